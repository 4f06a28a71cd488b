//! Tool call requests and their tracked lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::llm::MessageContent;
use crate::Error;

/// Who issued a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOrigin {
    /// Requested by the model; its response goes back in the next turn
    Model,
    /// Issued locally; handled without a model round-trip
    Client,
}

/// A single tool invocation request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub args: JsonValue,
    pub origin: CallOrigin,
}

impl ToolCallRequest {
    /// Request issued by the model
    pub fn model(call_id: impl Into<String>, name: impl Into<String>, args: JsonValue) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
            origin: CallOrigin::Model,
        }
    }

    /// Request issued by the local client
    pub fn client(name: impl Into<String>, args: JsonValue) -> Self {
        Self {
            call_id: format!("client-{}", uuid::Uuid::now_v7()),
            name: name.into(),
            args,
            origin: CallOrigin::Client,
        }
    }

    pub fn is_client_initiated(&self) -> bool {
        self.origin == CallOrigin::Client
    }

    /// The `tool_use` block recorded in the conversation for this request
    pub fn to_tool_use(&self) -> MessageContent {
        MessageContent::ToolUse {
            id: self.call_id.clone(),
            name: self.name.clone(),
            input: self.args.clone(),
        }
    }
}

/// Lifecycle status of a tracked tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Validating,
    AwaitingApproval,
    Scheduled,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Response payload for one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ToolResponse {
    pub fn new(request: &ToolCallRequest, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.name.clone(),
            content: content.into(),
            is_error,
            data: None,
        }
    }

    /// Synthesized reply for a call that was cancelled before finishing
    pub fn cancelled(request: &ToolCallRequest) -> Self {
        Self::new(
            request,
            format!(
                "[Operation Cancelled] Tool call '{}' was cancelled before it completed.",
                request.name
            ),
            true,
        )
    }

    /// Synthesized reply for a call the user refused
    pub fn denied(request: &ToolCallRequest) -> Self {
        Self::new(
            request,
            Error::ApprovalDenied(request.name.clone()).to_string(),
            true,
        )
    }

    pub fn to_tool_result(&self) -> MessageContent {
        MessageContent::ToolResult {
            tool_use_id: self.call_id.clone(),
            content: self.content.clone(),
            is_error: self.is_error,
        }
    }
}

/// A tool call owned by the scheduler for its whole lifetime.
///
/// Observers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedToolCall {
    pub request: ToolCallRequest,
    pub status: ToolCallStatus,
    /// Present only in terminal states
    pub response: Option<ToolResponse>,
    pub response_submitted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TrackedToolCall {
    pub(crate) fn new(request: ToolCallRequest) -> Self {
        let now = Utc::now();
        Self {
            request,
            status: ToolCallStatus::Validating,
            response: None,
            response_submitted: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    pub fn tool_name(&self) -> &str {
        &self.request.name
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a non-terminal status. Returns false if already terminal.
    pub(crate) fn transition(&mut self, status: ToolCallStatus) -> bool {
        debug_assert!(!status.is_terminal());
        if self.is_terminal() {
            return false;
        }
        if status == ToolCallStatus::Executing {
            self.started_at = Some(Utc::now());
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    /// Move to a terminal status. A call resolves at most once.
    pub(crate) fn resolve(&mut self, status: ToolCallStatus, response: ToolResponse) -> bool {
        debug_assert!(status.is_terminal());
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.response = Some(response);
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
