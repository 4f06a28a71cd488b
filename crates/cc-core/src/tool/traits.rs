//! Tool trait definition
//!
//! Defines the capability set every tool implements: validation,
//! an optional confirmation requirement, and cancellable execution.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Tool execution result
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Output string from tool execution
    pub output: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Machine-readable payload alongside the text output
    pub data: Option<JsonValue>,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
            data: None,
        }
    }

    /// Create an error tool result
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
            data: None,
        }
    }

    /// Attach structured data
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

/// What the presentation layer shows when a call needs approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationDetails {
    /// Key remembered by "proceed always" (e.g. `git` for `git status`)
    pub root: String,
    pub title: String,
    pub description: String,
}

impl ConfirmationDetails {
    pub fn new(
        root: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Progress callback handed to long-running tools
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call execution context
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: String,
    /// Shared cancellation token of the current turn
    pub cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            call_id: call_id.into(),
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Report intermediate output; a no-op when nobody listens
    pub fn report_progress(&self, message: &str) {
        if let Some(progress) = &self.progress {
            progress(message);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("call_id", &self.call_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Tool trait for Claude API tool_use
///
/// Implement this trait to create tools the scheduler can run when the
/// model (or the local client) requests them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name (used in Claude API tool definitions)
    fn name(&self) -> &str;

    /// Get the tool description (shown to Claude when selecting tools)
    fn description(&self) -> &str;

    /// Get the JSON schema for the tool's input parameters
    fn input_schema(&self) -> JsonValue;

    /// Check the arguments before anything else happens.
    ///
    /// The default accepts any JSON object.
    fn validate(&self, input: &JsonValue) -> Result<()> {
        if input.is_object() {
            Ok(())
        } else {
            Err(crate::Error::validation(format!(
                "{} expects an object argument",
                self.name()
            )))
        }
    }

    /// Return details when the call must be approved before running
    fn requires_confirmation(&self, _input: &JsonValue) -> Option<ConfirmationDetails> {
        None
    }

    /// Execute the tool with the given input
    ///
    /// Implementations should watch `ctx.cancel` at their own suspension
    /// points; the scheduler also stops awaiting them once it fires.
    async fn execute(&self, input: JsonValue, ctx: ToolContext) -> Result<ToolResult>;
}
