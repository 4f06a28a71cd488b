//! Model backend seam
//!
//! A backend turns a conversation into the event sequence of one model
//! turn. [`ClaudeBackend`] adapts the Messages API response into events.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::stream::StreamEvent;
use crate::tool::{ToolCallRequest, ToolResponse};

use super::client::ClaudeClient;
use super::types::{Conversation, MessageContent, MessagesResponse, ToolDefinition};

/// Events of a single model turn
pub type EventStream = BoxStream<'static, StreamEvent>;

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Start a model turn for the conversation as it stands
    async fn stream_turn(
        &self,
        conversation: &Conversation,
        cancel: CancellationToken,
    ) -> Result<EventStream>;

    /// Record tool responses so the next turn sees them
    fn continue_with_responses(&self, conversation: &mut Conversation, responses: Vec<ToolResponse>) {
        conversation.push_tool_results(responses.iter().map(ToolResponse::to_tool_result).collect());
    }
}

/// Backend over the Claude Messages API
pub struct ClaudeBackend {
    client: ClaudeClient,
    tools: Vec<ToolDefinition>,
}

impl ClaudeBackend {
    pub fn new(client: ClaudeClient, tools: Vec<ToolDefinition>) -> Self {
        Self { client, tools }
    }

    pub fn client(&self) -> &ClaudeClient {
        &self.client
    }

    /// Translate a complete response into turn events
    pub fn events_from_response(response: MessagesResponse) -> Vec<StreamEvent> {
        let mut events = Vec::with_capacity(response.content.len() + 1);
        for block in response.content {
            match block {
                MessageContent::Thinking { thinking, .. } => events.push(StreamEvent::Thought(thinking)),
                MessageContent::Text { text } if !text.is_empty() => {
                    events.push(StreamEvent::ContentDelta(text))
                }
                MessageContent::Text { .. } => {}
                MessageContent::ToolUse { id, name, input } => {
                    events.push(StreamEvent::ToolCallRequest(ToolCallRequest::model(id, name, input)))
                }
                MessageContent::ToolResult { .. } => {
                    debug!("Ignoring tool_result block in model response");
                }
            }
        }
        if let Some(usage) = response.usage {
            events.push(StreamEvent::UsageMetadata(usage));
        }
        events
    }
}

#[async_trait]
impl ModelBackend for ClaudeBackend {
    async fn stream_turn(
        &self,
        conversation: &Conversation,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let request = self.client.request_for(conversation, &self.tools);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(stream::iter([StreamEvent::UserCancelled]).boxed());
            }
            response = self.client.messages(request) => response,
        };

        let events = match response {
            Ok(response) => Self::events_from_response(response),
            Err(e) => {
                warn!("Model request failed: {}", e);
                vec![StreamEvent::Error(e.to_string())]
            }
        };
        Ok(stream::iter(events).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Usage;
    use serde_json::json;

    fn response(content: Vec<MessageContent>) -> MessagesResponse {
        MessagesResponse {
            id: "msg_1".into(),
            response_type: "message".into(),
            role: "assistant".into(),
            content,
            model: "claude".into(),
            stop_sequence: None,
            stop_reason: "tool_use".into(),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }),
        }
    }

    #[test]
    fn test_events_from_response() {
        let events = ClaudeBackend::events_from_response(response(vec![
            MessageContent::Thinking {
                thinking: "hmm".into(),
                signature: None,
            },
            MessageContent::Text { text: "Let me check.".into() },
            MessageContent::Text { text: String::new() },
            MessageContent::ToolUse {
                id: "toolu_1".into(),
                name: "bash".into(),
                input: json!({"command": "ls"}),
            },
        ]));

        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(kinds, vec!["thought", "content", "tool_call_request", "usage"]);
        match &events[2] {
            StreamEvent::ToolCallRequest(request) => {
                assert_eq!(request.call_id, "toolu_1");
                assert!(!request.is_client_initiated());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    struct Plain;

    #[async_trait]
    impl ModelBackend for Plain {
        async fn stream_turn(
            &self,
            _conversation: &Conversation,
            _cancel: CancellationToken,
        ) -> Result<EventStream> {
            Ok(stream::empty().boxed())
        }
    }

    #[test]
    fn test_default_continue_appends_one_user_message() {
        let mut conversation = Conversation::new();
        let request = ToolCallRequest::model("toolu_1", "bash", json!({}));
        let other = ToolCallRequest::model("toolu_2", "bash", json!({}));

        Plain.continue_with_responses(
            &mut conversation,
            vec![
                ToolResponse::new(&request, "a", false),
                ToolResponse::new(&other, "b", true),
            ],
        );

        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.last().unwrap().role, "user");
        assert_eq!(conversation.last().unwrap().tool_result_count(), 2);
    }
}
