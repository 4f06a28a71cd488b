//! Pending-content buffer with safe split points
//!
//! Streaming text is accumulated until it grows past a threshold, then
//! the finalized prefix is handed out as a chunk. Splits land on a
//! paragraph break when possible, then a line break, and never inside an
//! open fenced code block when a boundary outside one exists.

const FENCE: &str = "```";

#[derive(Debug, Clone)]
pub struct ContentBuffer {
    pending: String,
    threshold: usize,
}

impl ContentBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            pending: String::new(),
            threshold: threshold.max(1),
        }
    }

    /// Append a delta; returns the chunks finalized by it, in order
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.pending.push_str(delta);

        let mut chunks = Vec::new();
        while self.pending.len() > self.threshold {
            let split = find_safe_split(&self.pending, self.threshold);
            let rest = self.pending.split_off(split);
            chunks.push(std::mem::replace(&mut self.pending, rest));
        }
        chunks
    }

    /// Drain whatever is left, if anything
    pub fn take_remaining(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Byte index in `(0, max]` at which `text` can be split.
///
/// Always lands on a char boundary. Only falls back to a mid-line split
/// when no line boundary exists in range.
pub fn find_safe_split(text: &str, max: usize) -> usize {
    let limit = floor_char_boundary(text, max.min(text.len()));
    if limit == 0 {
        return text.chars().next().map_or(0, char::len_utf8);
    }

    let mut in_fence = false;
    let mut offset = 0;
    let mut paragraph = None;
    let mut line = None;

    for segment in text[..limit].split_inclusive('\n') {
        offset += segment.len();
        if segment.trim_start().starts_with(FENCE) {
            in_fence = !in_fence;
        }
        if !segment.ends_with('\n') || in_fence {
            continue;
        }
        line = Some(offset);
        if segment == "\n" && offset > 1 {
            paragraph = Some(offset);
        }
    }

    paragraph.or(line).unwrap_or(limit)
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
