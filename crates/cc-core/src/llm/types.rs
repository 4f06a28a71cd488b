//! Claude API types

use serde::{Deserialize, Serialize};

/// Message in conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: Vec<MessageContent>,
}

impl Message {
    /// Create a user message with text
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }

    /// Create an assistant message with text
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }

    /// Get text content from message
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of tool results carried by this message
    pub fn tool_result_count(&self) -> usize {
        self.content
            .iter()
            .filter(|c| matches!(c, MessageContent::ToolResult { .. }))
            .count()
    }
}

/// Content block in a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// Tool definition for Claude API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Messages API request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Messages API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<MessageContent>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    pub stop_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Conversation state handed to the model backend on every turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            messages: vec![],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// Record what the model produced in one turn: its text and the tool uses it issued
    pub fn push_assistant_turn(&mut self, text: &str, tool_uses: Vec<MessageContent>) {
        let mut content = Vec::with_capacity(tool_uses.len() + 1);
        if !text.is_empty() {
            content.push(MessageContent::Text {
                text: text.to_string(),
            });
        }
        content.extend(tool_uses);
        if content.is_empty() {
            return;
        }
        self.messages.push(Message {
            role: "assistant".to_string(),
            content,
        });
    }

    /// Append one user message carrying tool results, in the given order
    pub fn push_tool_results(&mut self, results: Vec<MessageContent>) {
        if results.is_empty() {
            return;
        }
        self.messages.push(Message {
            role: "user".to_string(),
            content: results,
        });
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_serialization() {
        let content = MessageContent::ToolResult {
            tool_use_id: "toolu_1".into(),
            content: "ok".into(),
            is_error: false,
        };
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        assert!(json.contains(r#""tool_use_id":"toolu_1""#));
    }

    #[test]
    fn test_thinking_block_deserializes_without_signature() {
        let json = r#"{"type":"thinking","thinking":"hmm"}"#;
        let content: MessageContent = serde_json::from_str(json).unwrap();
        assert_eq!(
            content,
            MessageContent::Thinking {
                thinking: "hmm".into(),
                signature: None
            }
        );
    }

    #[test]
    fn test_conversation_skips_empty_assistant_turn() {
        let mut conversation = Conversation::new();
        conversation.push_assistant_turn("", vec![]);
        assert!(conversation.is_empty());

        conversation.push_assistant_turn("hi", vec![]);
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.last().unwrap().text_content(), "hi");
    }

    #[test]
    fn test_conversation_tool_results_single_message() {
        let mut conversation = Conversation::with_system("be brief");
        conversation.push_tool_results(vec![
            MessageContent::ToolResult {
                tool_use_id: "a".into(),
                content: "1".into(),
                is_error: false,
            },
            MessageContent::ToolResult {
                tool_use_id: "b".into(),
                content: "2".into(),
                is_error: true,
            },
        ]);

        assert_eq!(conversation.len(), 1);
        let message = conversation.last().unwrap();
        assert_eq!(message.role, "user");
        assert_eq!(message.tool_result_count(), 2);
    }
}
