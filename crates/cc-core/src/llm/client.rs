//! Claude Messages API HTTP client

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

use super::types::*;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude Messages API client
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u64,
    base_url: String,
}

impl ClaudeClient {
    /// Create a new client from configuration
    pub fn new(config: &Config) -> Result<Self> {
        if config.llm.api_key.is_empty() {
            return Err(Error::Config(
                "LLM_API_KEY or CLAUDE_API_KEY not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            api_key: config.llm.api_key.clone(),
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            base_url: config
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    /// Send a request to the Messages API
    pub async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse> {
        let url = format!("{}/messages", self.base_url);

        debug!("Sending request to Claude API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("Claude API error: {} - {}", status, body);
            return Err(Error::ClaudeApi(format!("{}: {}", status, body)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            Error::ClaudeApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        info!(
            "Claude API response: stop_reason={}, tokens={}",
            parsed.stop_reason,
            parsed.usage.map(|u| u.output_tokens).unwrap_or(0)
        );

        Ok(parsed)
    }

    /// Build a request for the given conversation
    pub fn request_for(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: conversation.system.clone(),
            messages: conversation.messages.clone(),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        }
    }

    /// Get the model name
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.llm.api_key = "test-key".to_string();
        config
    }

    #[test]
    fn test_client_requires_api_key() {
        let result = ClaudeClient::new(&Config::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_client_default_base_url() {
        let client = ClaudeClient::new(&test_config()).unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(client.model(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_request_for_omits_empty_tools() {
        let client = ClaudeClient::new(&test_config()).unwrap();
        let mut conversation = Conversation::with_system("sys");
        conversation.push_user("hello");

        let request = client.request_for(&conversation, &[]);
        assert!(request.tools.is_none());
        assert_eq!(request.system.as_deref(), Some("sys"));
        assert_eq!(request.messages.len(), 1);

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
    }
}
