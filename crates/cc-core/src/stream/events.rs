//! Events produced by one model turn

use serde::{Deserialize, Serialize};

use crate::llm::Usage;
use crate::tool::{ToolCallRequest, ToolResponse};

/// Context compression performed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub original_token_count: u64,
    pub new_token_count: u64,
}

/// One item of a model turn's event sequence
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Thought(String),
    ContentDelta(String),
    ToolCallRequest(ToolCallRequest),
    ToolCallResponse(ToolResponse),
    UserCancelled,
    Error(String),
    ChatCompressed(CompressionInfo),
    UsageMetadata(Usage),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thought(_) => "thought",
            Self::ContentDelta(_) => "content",
            Self::ToolCallRequest(_) => "tool_call_request",
            Self::ToolCallResponse(_) => "tool_call_response",
            Self::UserCancelled => "user_cancelled",
            Self::Error(_) => "error",
            Self::ChatCompressed(_) => "chat_compressed",
            Self::UsageMetadata(_) => "usage",
        }
    }
}
