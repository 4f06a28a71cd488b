//! cc-core: Agent Core Library
//!
//! Claude APIとのストリーミング、ツール呼び出しのスケジューリング、
//! サブエージェントの実行と委譲のコア機能を提供します。

pub mod agents;
pub mod config;
pub mod error;
pub mod llm;
pub mod observer;
pub mod stream;
pub mod tool;

pub use agents::{
    CommandSpawner, DelegationReport, DelegationRequest, ExecutorConfig, SubAgentExecutor,
    SubAgentParams, TaskDelegator, TaskId, TaskPriority, TaskStatus,
};
pub use config::{AgentsConfig, ApprovalConfig, ApprovalMode, Config, LlmConfig, StreamConfig};
pub use error::{Error, Result};
pub use llm::{ClaudeBackend, ClaudeClient, Conversation, Message, MessageContent, ModelBackend, ToolDefinition};
pub use observer::{NoopObserver, TurnObserver};
pub use stream::{StreamCoordinator, StreamEvent, TurnOutcome};
pub use tool::{Tool, ToolCallRequest, ToolManager, ToolResult, ToolScheduler};
