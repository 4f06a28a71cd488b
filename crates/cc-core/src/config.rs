//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. cc-agent.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::agents::{
    DEFAULT_MAX_CONCURRENT_AGENTS, DEFAULT_TIMEOUT_SECS, MAX_CONCURRENT_AGENTS, MAX_TIMEOUT_SECS,
    MIN_TIMEOUT_SECS,
};
use crate::Error;

/// Default configuration file name looked up in the current directory
pub const CONFIG_FILE_NAME: &str = "cc-agent.toml";

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    #[serde(default)]
    pub api_key: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: None,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u64 {
    4096
}

/// Sub-agent executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Maximum simultaneously running sub-agents (1-5)
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Timeout applied when a task does not specify one (5-300)
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Delay between graceful and forced termination
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Total attempts per task including the first one (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Command used to launch a sub-agent (defaults to the running binary)
    pub agent_command: Option<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            default_timeout_secs: default_timeout_secs(),
            grace_period_ms: default_grace_period_ms(),
            max_attempts: default_max_attempts(),
            agent_command: None,
        }
    }
}

impl AgentsConfig {
    /// Clamp every field into its accepted range
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_agents = self.max_concurrent_agents.clamp(1, MAX_CONCURRENT_AGENTS);
        self.default_timeout_secs = self
            .default_timeout_secs
            .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        self.max_attempts = self.max_attempts.max(1);
        self
    }
}

fn default_max_concurrent_agents() -> usize {
    DEFAULT_MAX_CONCURRENT_AGENTS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_grace_period_ms() -> u64 {
    200
}

fn default_max_attempts() -> u32 {
    1
}

/// Stream coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pending content size that triggers a split
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold_bytes: usize,

    /// Maximum consecutive tool-call turns before giving up
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: default_flush_threshold(),
            max_turns: default_max_turns(),
        }
    }
}

fn default_flush_threshold() -> usize {
    4096
}

fn default_max_turns() -> usize {
    50
}

/// How confirmation-requiring tool calls are answered
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Ask the presentation layer
    #[default]
    Prompt,
    /// Approve everything without asking
    Auto,
    /// Refuse everything that needs confirmation
    Deny,
}

impl ApprovalMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "prompt" => Some(Self::Prompt),
            "auto" | "yolo" => Some(Self::Auto),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// Approval configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub mode: ApprovalMode,

    /// Tool roots approved for every session from the start
    #[serde(default)]
    pub auto_approved: Vec<String>,
}

/// Main configuration for cc-agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let var_name = &after[..end];
                    if let Ok(env_value) = std::env::var(var_name) {
                        result.push_str(&env_value);
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    // 閉じ括弧がない場合はそのまま残す
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        result.push_str(rest);

        result
    }

    /// TOML 文字列から設定を読み込む (環境変数展開込み)
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let config: Config = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        Ok(config.normalized())
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換され、
    /// その後、既存の環境変数で上書きされます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let toml_content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();
        Ok(cfg.normalized())
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `./cc-agent.toml` があればそれを使い、なければ環境変数のみを使います。
    pub fn load() -> crate::Result<Self> {
        if Path::new(CONFIG_FILE_NAME).exists() {
            return Self::from_toml_file(CONFIG_FILE_NAME);
        }
        Self::from_env()
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg.normalized())
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = std::env::var("LLM_API_KEY").or_else(|_| std::env::var("CLAUDE_API_KEY")) {
            self.llm.api_key = api_key;
        }
        if let Some(model) = non_empty_var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(base_url) = non_empty_var("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }

        if let Some(n) = non_empty_var("CC_MAX_CONCURRENT_AGENTS").and_then(|v| v.parse().ok()) {
            self.agents.max_concurrent_agents = n;
        }
        if let Some(secs) = non_empty_var("CC_SUBAGENT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.agents.default_timeout_secs = secs;
        }
        if let Some(attempts) = non_empty_var("CC_SUBAGENT_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.agents.max_attempts = attempts;
        }
        if let Some(command) = non_empty_var("CC_AGENT_COMMAND") {
            self.agents.agent_command = Some(command);
        }

        if let Some(mode) = non_empty_var("CC_APPROVAL_MODE").and_then(|v| ApprovalMode::parse(&v)) {
            self.approval.mode = mode;
        }
    }

    fn normalized(mut self) -> Self {
        self.agents = self.agents.normalized();
        self.stream.flush_threshold_bytes = self.stream.flush_threshold_bytes.max(64);
        self.stream.max_turns = self.stream.max_turns.max(1);
        self
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
