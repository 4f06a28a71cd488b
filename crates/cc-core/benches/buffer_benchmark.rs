//! Content Buffer Benchmarks
//!
//! Measures performance of streamed content handling:
//! - Safe split point search over prose and fenced code
//! - Chunked pushes through ContentBuffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cc_core::stream::{find_safe_split, ContentBuffer};

fn prose(paragraphs: usize) -> String {
    let mut text = String::new();
    for i in 0..paragraphs {
        text.push_str(&format!(
            "Paragraph {i} explains one step of the change in plain words.\nA second line follows.\n\n"
        ));
    }
    text
}

fn fenced(blocks: usize) -> String {
    let mut text = String::new();
    for i in 0..blocks {
        text.push_str(&format!(
            "Example {i}:\n\n```rust\nfn step_{i}() {{\n\n    println!(\"{i}\");\n}}\n```\n\n"
        ));
    }
    text
}

fn bench_find_safe_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_safe_split");

    for size in [10, 100, 1000] {
        let text = prose(size);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("prose", size), &text, |b, text| {
            b.iter(|| find_safe_split(black_box(text), text.len() / 2))
        });

        let text = fenced(size);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("fenced", size), &text, |b, text| {
            b.iter(|| find_safe_split(black_box(text), text.len() / 2))
        });
    }

    group.finish();
}

fn bench_content_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_buffer");

    let text = prose(200) + &fenced(50);
    let chunks: Vec<&str> = text
        .as_bytes()
        .chunks(64)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();

    for threshold in [256, 4096] {
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("push_chunks", threshold),
            &threshold,
            |b, &threshold| {
                b.iter(|| {
                    let mut buffer = ContentBuffer::new(threshold);
                    let mut flushed = 0;
                    for chunk in &chunks {
                        flushed += buffer.push(chunk).len();
                    }
                    black_box((flushed, buffer.take_remaining()))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_find_safe_split, bench_content_buffer);
criterion_main!(benches);
