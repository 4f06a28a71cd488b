//! Sub-agent task types
//!
//! Defines the task representation shared by the executor, the delegator
//! and the tools built on them.

use std::fmt;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hard ceiling on simultaneously running sub-agents
pub const MAX_CONCURRENT_AGENTS: usize = 5;
pub const DEFAULT_MAX_CONCURRENT_AGENTS: usize = 3;
pub const MIN_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Minimum task text length, in characters
pub const MIN_TASK_LEN: usize = 10;

/// Unique identifier for a delegated task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Priority level for task execution
///
/// Ordered so that `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Status of a delegated task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sub-agent is asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAgentParams {
    pub task: String,
    pub context: Option<String>,
    /// Seconds; falls back to the executor default when absent
    pub timeout_secs: Option<u64>,
    pub priority: TaskPriority,
    /// Relative to the executor's base directory
    pub working_directory: Option<String>,
}

impl SubAgentParams {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: None,
            timeout_secs: None,
            priority: TaskPriority::default(),
            working_directory: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let len = self.task.trim().chars().count();
        if len < MIN_TASK_LEN {
            return Err(Error::validation(format!(
                "Task description must be at least {} characters (got {})",
                MIN_TASK_LEN, len
            )));
        }

        match self.timeout_secs {
            Some(secs) if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) => {
                return Err(Error::validation(format!(
                    "Timeout must be between {} and {} seconds (got {})",
                    MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, secs
                )));
            }
            _ => {}
        }

        if let Some(dir) = &self.working_directory {
            validate_working_directory(dir)?;
        }

        Ok(())
    }

    /// Prompt handed to the sub-agent process
    pub fn prompt(&self) -> String {
        match self.context.as_deref().map(str::trim) {
            Some(context) if !context.is_empty() => {
                format!("{}\n\nContext:\n{}", self.task.trim(), context)
            }
            _ => self.task.trim().to_string(),
        }
    }
}

fn validate_working_directory(dir: &str) -> Result<()> {
    let path = Path::new(dir);
    if dir.trim().is_empty() {
        return Err(Error::validation("Working directory must not be empty"));
    }
    if path.is_absolute() {
        return Err(Error::validation(format!(
            "Working directory must be relative: {}",
            dir
        )));
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::validation(format!(
            "Working directory must stay inside the base directory: {}",
            dir
        )));
    }
    Ok(())
}

/// Why a task did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Non-zero exit, spawn failure or lost process
    Execution,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A task tracked by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentTask {
    pub id: TaskId,
    pub params: SubAgentParams,
    pub status: TaskStatus,
    /// 1-based attempt number
    pub attempt: u32,
    /// The failed task this one retries
    pub retry_of: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Captured output on success
    pub result: Option<String>,
    pub error: Option<TaskError>,
}

impl SubAgentTask {
    pub fn new(params: SubAgentParams) -> Self {
        Self {
            id: TaskId::default(),
            params,
            status: TaskStatus::Pending,
            attempt: 1,
            retry_of: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Fresh pending task repeating this one's parameters
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            retry_of: Some(self.id.clone()),
            ..Self::new(self.params.clone())
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock run time, once started and finished
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Counts and timings over a set of terminal tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub total_duration_ms: u64,
    pub average_duration_ms: u64,
}

impl ExecutionSummary {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a SubAgentTask>) -> Self {
        let mut summary = Self::default();
        let mut timed = 0u64;
        for task in tasks {
            summary.total += 1;
            match task.status {
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
                TaskStatus::Pending | TaskStatus::Running => {}
            }
            if let Some(ms) = task.duration_ms() {
                summary.total_duration_ms += ms;
                timed += 1;
            }
        }
        if timed > 0 {
            summary.average_duration_ms = summary.total_duration_ms / timed;
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.completed == self.total
    }
}

/// Point-in-time executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStatus {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_concurrent: usize,
    /// Highest number of simultaneously occupied slots so far
    pub peak_running: usize,
}

impl ExecutorStatus {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// Lifecycle notifications published by the executor
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Queued { id: TaskId, priority: TaskPriority },
    Started { id: TaskId, attempt: u32 },
    /// Published exactly once per task
    Finished(SubAgentTask),
}

/// How often a failed task is attempted again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retries
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_attempts: 1 }
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Only failures are retried; timeouts and cancellations are final
    pub fn should_retry(&self, task: &SubAgentTask) -> bool {
        task.status == TaskStatus::Failed
            && task.error.as_ref().map(|e| e.kind) == Some(FailureKind::Execution)
            && task.attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
