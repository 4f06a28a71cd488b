//! Terminal presentation: turn observers and the stdin approval prompt

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use cc_core::llm::Usage;
use cc_core::stream::CompressionInfo;
use cc_core::tool::{
    ApprovalHandler, ApprovalOutcome, ConfirmationRequest, ToolCallStatus, TrackedToolCall,
};
use cc_core::TurnObserver;
use nu_ansi_term::{Color, Style};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Longest tool error echoed to the terminal
const MAX_ERROR_PREVIEW: usize = 200;

/// One-line summary of a tool call state change, `None` for states not worth showing
fn status_line(
    tool: &str,
    status: ToolCallStatus,
    duration_ms: Option<i64>,
    response: Option<&str>,
) -> Option<String> {
    let line = match status {
        ToolCallStatus::Executing => Color::Cyan.paint(format!("⚙ {}", tool)).to_string(),
        ToolCallStatus::Success => {
            let took = duration_ms.map(|ms| format!(" ({}ms)", ms)).unwrap_or_default();
            Color::Green.paint(format!("✓ {}{}", tool, took)).to_string()
        }
        ToolCallStatus::Error => {
            let detail = response
                .and_then(|r| r.lines().next())
                .map(|l| preview(l, MAX_ERROR_PREVIEW))
                .unwrap_or_default();
            Color::Red.paint(format!("✗ {}: {}", tool, detail)).to_string()
        }
        ToolCallStatus::Cancelled => Color::Yellow.paint(format!("⊘ {} cancelled", tool)).to_string(),
        _ => return None,
    };
    Some(line)
}

fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &text[..i]),
        None => text.to_string(),
    }
}

fn describe(call: &TrackedToolCall) -> Option<String> {
    status_line(
        call.tool_name(),
        call.status,
        call.duration_ms(),
        call.response.as_ref().map(|r| r.content.as_str()),
    )
}

/// 対話モード用: 出力を色付きで表示
pub struct ConsoleObserver;

impl TurnObserver for ConsoleObserver {
    fn on_content(&self, chunk: &str) {
        print!("{}", chunk);
        let _ = std::io::stdout().flush();
    }

    fn on_thought(&self, text: &str) {
        println!("{}", Style::new().dimmed().italic().paint(text));
    }

    fn on_tool_status(&self, call: &TrackedToolCall) {
        if let Some(line) = describe(call) {
            eprintln!("{}", line);
        }
    }

    fn on_tool_progress(&self, _call_id: &str, message: &str) {
        eprintln!("  {}", Style::new().dimmed().paint(message));
    }

    fn on_cancelled(&self, interrupted_tools: &[String]) {
        let mut message = String::from("Request cancelled.");
        if !interrupted_tools.is_empty() {
            message.push_str(&format!(" Interrupted: {}", interrupted_tools.join(", ")));
        }
        eprintln!("\n{}", Color::Yellow.paint(message));
    }

    fn on_error(&self, message: &str) {
        eprintln!("\n{}", Color::Red.paint(format!("❌ {}", message)));
    }

    fn on_chat_compressed(&self, info: &CompressionInfo) {
        eprintln!(
            "{}",
            Style::new().dimmed().paint(format!(
                "Context compressed: {} → {} tokens",
                info.original_token_count, info.new_token_count
            ))
        );
    }

    fn on_usage(&self, usage: &Usage) {
        debug!("Tokens: {} in / {} out", usage.input_tokens, usage.output_tokens);
    }
}

/// ヘッドレスモード用: 本文だけを stdout に出す
///
/// Everything else goes to the log on stderr, so a parent process captures
/// exactly the answer.
pub struct HeadlessObserver;

impl TurnObserver for HeadlessObserver {
    fn on_content(&self, chunk: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
    }

    fn on_tool_status(&self, call: &TrackedToolCall) {
        if call.status.is_terminal() {
            info!(
                call_id = %call.request.call_id,
                "Tool {} ended {}",
                call.tool_name(),
                call.status.as_str()
            );
        }
    }

    fn on_cancelled(&self, interrupted_tools: &[String]) {
        warn!("Cancelled; interrupted tools: {:?}", interrupted_tools);
    }

    fn on_error(&self, message: &str) {
        eprintln!("{}", message);
    }
}

/// Map a typed answer to an approval outcome; anything unrecognised denies
pub fn parse_answer(input: &str) -> ApprovalOutcome {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => ApprovalOutcome::ProceedOnce,
        "a" | "always" => ApprovalOutcome::ProceedAlways,
        _ => ApprovalOutcome::Deny,
    }
}

/// Blocking source of one answer line
type ReadLineFn = Arc<dyn Fn() -> std::io::Result<String> + Send + Sync>;

fn read_stdin_line() -> std::io::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

/// Asks on the terminal before a tool runs.
///
/// A blocking stdin read cannot be aborted, so a read left behind by a
/// cancelled prompt stays here. The next prompt reuses it, and the REPL
/// drains it with [`StdinApprover::finish_interrupted`] before reading input
/// again.
pub struct StdinApprover {
    read_line: ReadLineFn,
    in_flight: Mutex<Option<JoinHandle<std::io::Result<String>>>>,
}

impl StdinApprover {
    pub fn new() -> Self {
        Self::with_reader(Arc::new(read_stdin_line))
    }

    fn with_reader(read_line: ReadLineFn) -> Self {
        Self {
            read_line,
            in_flight: Mutex::new(None),
        }
    }

    /// Wait for the next line, picking up a read a cancelled prompt left behind
    async fn next_line(&self) -> std::io::Result<String> {
        let mut in_flight = self.in_flight.lock().await;
        let read_line = self.read_line.clone();
        let handle = in_flight.get_or_insert_with(|| tokio::task::spawn_blocking(move || read_line()));
        let line = handle.await;
        *in_flight = None;
        line.map_err(std::io::Error::other)?
    }

    pub async fn has_interrupted_read(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Consume the line an interrupted prompt is still waiting for, so it
    /// does not swallow the next REPL input
    pub async fn finish_interrupted(&self) {
        if !self.has_interrupted_read().await {
            return;
        }
        eprint!(
            "{}",
            Style::new()
                .dimmed()
                .paint("(approval prompt interrupted; press Enter to continue) ")
        );
        let _ = std::io::stderr().flush();
        match self.next_line().await {
            Ok(line) => debug!("Discarded interrupted answer {:?}", line.trim()),
            Err(e) => warn!("Failed to read interrupted answer: {}", e),
        }
    }
}

impl Default for StdinApprover {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalHandler for StdinApprover {
    async fn request_approval(&self, request: &ConfirmationRequest) -> ApprovalOutcome {
        eprintln!();
        eprintln!(
            "{} {}",
            Color::Yellow.bold().paint("?"),
            Style::new().bold().paint(&request.details.title)
        );
        for line in request.details.description.lines() {
            eprintln!("    {}", line);
        }
        eprint!(
            "  Allow {}? [y]es / [a]lways allow '{}' / [n]o: ",
            request.tool_name, request.details.root
        );
        let _ = std::io::stderr().flush();

        match self.next_line().await {
            Ok(line) => parse_answer(&line),
            Err(e) => {
                warn!("Failed to read approval answer: {}", e);
                ApprovalOutcome::Deny
            }
        }
    }
}
