//! Sub-Agent Architecture
//!
//! Sub-agents are separate processes that each run one task to completion.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TaskDelegator                           │
//! │  - Validate the whole request up front                       │
//! │  - Sequential or parallel execution                          │
//! │  - Aggregate per-subtask results                             │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SubAgentExecutor                          │
//! │  priority queue ─▶ slots (max 1..=5) ─▶ timeout / cancel     │
//! └───────┬────────────┬────────────┬───────────────────────────┘
//!         ▼            ▼            ▼
//!    ┌─────────┐  ┌─────────┐  ┌─────────┐
//!    │ process │  │ process │  │ process │   (ProcessSpawner)
//!    └─────────┘  └─────────┘  └─────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cc_core::agents::{CommandSpawner, ExecutorConfig, SubAgentExecutor, SubAgentParams};
//! use std::sync::Arc;
//!
//! let spawner = Arc::new(CommandSpawner::from_config(None)?);
//! let executor = SubAgentExecutor::new(spawner, ExecutorConfig::default());
//!
//! executor.add_task(SubAgentParams::new("Summarize the open issues in README.md"))?;
//! let summary = executor.wait_for_completion().await?;
//! println!("{} completed", summary.completed);
//! ```

pub mod delegation;
pub mod executor;
pub mod spawner;
pub mod types;

// Re-exports
pub use delegation::{
    DelegationReport, DelegationRequest, ExecutionMode, SubtaskOutcome, SubtaskSpec,
    TaskDelegator, MAX_SUBTASKS,
};
pub use executor::{ExecutorConfig, SubAgentExecutor};
pub use spawner::{
    AgentProcess, CommandSpawner, ProcessExit, ProcessSignal, ProcessSpawner, SpawnRequest,
    SUBAGENT_ENV,
};
pub use types::{
    ExecutionSummary, ExecutorEvent, ExecutorStatus, FailureKind, RetryPolicy, SubAgentParams,
    SubAgentTask, TaskError, TaskId, TaskPriority, TaskStatus, DEFAULT_MAX_CONCURRENT_AGENTS,
    DEFAULT_TIMEOUT_SECS, MAX_CONCURRENT_AGENTS, MAX_TIMEOUT_SECS, MIN_TASK_LEN, MIN_TIMEOUT_SECS,
};
