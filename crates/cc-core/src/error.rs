//! Error types for cc-core

use std::time::Duration;

use thiserror::Error;

/// Main error type for cc-core
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range parameters, rejected before scheduling or spawning
    #[error("Validation error: {0}")]
    Validation(String),

    /// The user explicitly refused the named tool call
    #[error("[Operation Cancelled] Tool call '{0}' denied by user.")]
    ApprovalDenied(String),

    /// A tool or sub-agent process failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// Exceeded the allotted time and was forcibly terminated
    #[error("Timed out after {}", format_duration(.after))]
    Timeout { after: Duration },

    /// Aborted through the shared cancellation token
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this error should be reported before anything was scheduled
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result type alias for cc-core
pub type Result<T> = std::result::Result<T, Error>;

/// `5s` for whole seconds, `250ms` otherwise
pub(crate) fn format_duration(duration: &Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
