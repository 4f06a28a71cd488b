//! Task delegation and result aggregation
//!
//! Implements:
//! - DelegationRequest: a main task split into subtasks
//! - TaskDelegator: runs subtasks on a sub-agent executor, sequentially
//!   or in parallel, in the foreground or the background
//! - DelegationReport: per-subtask outcomes plus an overall summary

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::executor::{ExecutorConfig, SubAgentExecutor};
use super::spawner::ProcessSpawner;
use super::types::{
    ExecutionSummary, ExecutorStatus, SubAgentParams, SubAgentTask, TaskId, TaskPriority,
    TaskStatus, DEFAULT_MAX_CONCURRENT_AGENTS, MAX_CONCURRENT_AGENTS,
};
use crate::{Error, Result};

/// Upper bound on subtasks per delegation
pub const MAX_SUBTASKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
        }
    }
}

/// One unit of delegated work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskSpec {
    pub task: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

impl SubtaskSpec {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: None,
            priority: None,
            timeout: None,
            working_directory: None,
        }
    }

    pub fn to_params(&self) -> SubAgentParams {
        SubAgentParams {
            task: self.task.clone(),
            context: self.context.clone(),
            timeout_secs: self.timeout,
            priority: self.priority.unwrap_or_default(),
            working_directory: self.working_directory.clone(),
        }
    }
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_AGENTS
}

fn default_true() -> bool {
    true
}

/// A main task broken into subtasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    pub main_task: String,
    pub subtasks: Vec<SubtaskSpec>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Parallel mode only; clamped to 1-5
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_agents: usize,
    #[serde(default = "default_true")]
    pub wait_for_completion: bool,
    #[serde(default = "default_true")]
    pub aggregate_results: bool,
}

impl DelegationRequest {
    pub fn new(main_task: impl Into<String>, subtasks: Vec<SubtaskSpec>) -> Self {
        Self {
            main_task: main_task.into(),
            subtasks,
            execution_mode: ExecutionMode::default(),
            max_concurrent_agents: DEFAULT_MAX_CONCURRENT_AGENTS,
            wait_for_completion: true,
            aggregate_results: true,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_agents = max;
        self
    }

    pub fn in_background(mut self) -> Self {
        self.wait_for_completion = false;
        self
    }

    pub fn without_aggregation(mut self) -> Self {
        self.aggregate_results = false;
        self
    }

    /// Concurrency actually used for this request
    pub fn effective_concurrency(&self) -> usize {
        match self.execution_mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel => self.max_concurrent_agents.clamp(1, MAX_CONCURRENT_AGENTS),
        }
    }

    /// Reject the whole request before anything is spawned
    pub fn validate(&self) -> Result<()> {
        if self.main_task.trim().is_empty() {
            return Err(Error::validation("Main task must not be empty"));
        }
        if self.subtasks.is_empty() {
            return Err(Error::validation("At least one subtask is required"));
        }
        if self.subtasks.len() > MAX_SUBTASKS {
            return Err(Error::validation(format!(
                "At most {} subtasks are allowed (got {})",
                MAX_SUBTASKS,
                self.subtasks.len()
            )));
        }
        for (i, subtask) in self.subtasks.iter().enumerate() {
            subtask
                .to_params()
                .validate()
                .map_err(|e| Error::validation(format!("Subtask {}: {}", i + 1, e)))?;
        }
        Ok(())
    }
}

/// Outcome of one subtask, in input order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskOutcome {
    pub index: usize,
    pub task: String,
    /// `None` when the subtask was never submitted
    pub task_id: Option<TaskId>,
    pub status: Option<TaskStatus>,
    pub attempts: u32,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl SubtaskOutcome {
    fn skipped(index: usize, spec: &SubtaskSpec) -> Self {
        Self {
            index,
            task: spec.task.clone(),
            task_id: None,
            status: None,
            attempts: 0,
            output: None,
            error: None,
            duration_ms: None,
        }
    }

    fn from_task(index: usize, spec: &SubtaskSpec, task: &SubAgentTask, aggregate: bool) -> Self {
        Self {
            index,
            task: spec.task.clone(),
            task_id: Some(task.id.clone()),
            status: Some(task.status),
            attempts: task.attempt,
            output: if aggregate { task.result.clone() } else { None },
            error: task.error.as_ref().map(|e| e.message.clone()),
            duration_ms: task.duration_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationReport {
    pub delegation_id: String,
    pub main_task: String,
    pub mode: ExecutionMode,
    pub max_concurrent: usize,
    /// False for a delegation still running in the background
    pub finished: bool,
    pub subtasks: Vec<SubtaskOutcome>,
    pub summary: ExecutionSummary,
    /// Executor snapshot for background delegations
    pub status: Option<ExecutorStatus>,
}

impl DelegationReport {
    pub fn succeeded(&self) -> usize {
        self.subtasks
            .iter()
            .filter(|s| s.status == Some(TaskStatus::Completed))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.finished && self.succeeded() == self.subtasks.len()
    }

    /// Human-readable report
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Delegated: {}", self.main_task);
        let _ = writeln!(
            out,
            "Mode: {} (up to {} concurrent agent{})",
            self.mode.as_str(),
            self.max_concurrent,
            if self.max_concurrent == 1 { "" } else { "s" }
        );

        if !self.finished {
            let _ = writeln!(
                out,
                "Delegation {} is running in the background with {} subtasks",
                self.delegation_id,
                self.subtasks.len()
            );
            if let Some(status) = &self.status {
                let _ = writeln!(
                    out,
                    "Pending: {}, Running: {}, Completed: {}, Failed: {}",
                    status.pending, status.running, status.completed, status.failed
                );
            }
            return out.trim_end().to_string();
        }

        let _ = writeln!(
            out,
            "{} of {} subtasks succeeded",
            self.succeeded(),
            self.subtasks.len()
        );

        for subtask in &self.subtasks {
            let _ = writeln!(out, "\n### {}. {}", subtask.index + 1, subtask.task);
            match (subtask.status, subtask.duration_ms) {
                (None, _) => {
                    let _ = writeln!(out, "Status: skipped (not started)");
                }
                (Some(status), Some(ms)) => {
                    let _ = writeln!(out, "Status: {} ({})", status, format_ms(ms));
                }
                (Some(status), None) => {
                    let _ = writeln!(out, "Status: {}", status);
                }
            }
            if subtask.attempts > 1 {
                let _ = writeln!(out, "Attempts: {}", subtask.attempts);
            }
            if let Some(error) = &subtask.error {
                let _ = writeln!(out, "Error: {}", error);
            }
            if let Some(output) = subtask.output.as_deref().filter(|o| !o.is_empty()) {
                let _ = writeln!(out, "{}", output);
            }
        }

        let _ = writeln!(
            out,
            "\nCompleted: {}, Failed: {}, Cancelled: {}, Total time: {}, Average: {}",
            self.summary.completed,
            self.summary.failed,
            self.summary.cancelled,
            format_ms(self.summary.total_duration_ms),
            format_ms(self.summary.average_duration_ms)
        );
        out.trim_end().to_string()
    }
}

fn format_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// A delegation still tracked after `delegate` returned
struct BackgroundDelegation {
    executor: SubAgentExecutor,
    subtasks: usize,
    /// Submits the subtasks and ends once they are all terminal
    runner: JoinHandle<()>,
}

impl BackgroundDelegation {
    fn is_finished(&self) -> bool {
        self.runner.is_finished()
    }

    /// Subtasks the runner has not submitted yet count as pending
    async fn status(&self) -> Result<ExecutorStatus> {
        let mut status = self.executor.status().await?;
        if !self.is_finished() {
            let unsubmitted = self.subtasks.saturating_sub(status.total);
            status.total += unsubmitted;
            status.pending += unsubmitted;
        }
        Ok(status)
    }
}

/// Runs delegations on freshly created executors
pub struct TaskDelegator {
    spawner: Arc<dyn ProcessSpawner>,
    config: ExecutorConfig,
    background: Mutex<HashMap<String, BackgroundDelegation>>,
}

impl TaskDelegator {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, config: ExecutorConfig) -> Self {
        Self {
            spawner,
            config,
            background: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Validate, then run the request.
    ///
    /// Cancelling `cancel` stops pending subtasks and terminates running ones;
    /// the report still covers every subtask.
    pub async fn delegate(
        &self,
        request: DelegationRequest,
        cancel: &CancellationToken,
    ) -> Result<DelegationReport> {
        request.validate()?;

        let delegation_id = uuid::Uuid::now_v7().to_string();
        let concurrency = request.effective_concurrency();
        info!(
            "Delegation {}: {} subtasks, {} mode, {} concurrent",
            delegation_id,
            request.subtasks.len(),
            request.execution_mode.as_str(),
            concurrency
        );

        let executor = SubAgentExecutor::new(
            self.spawner.clone(),
            self.config.clone().with_max_concurrent(concurrency),
        );

        if !request.wait_for_completion {
            return self
                .start_background(delegation_id, request, executor, cancel.clone())
                .await;
        }

        let tasks = match request.execution_mode {
            ExecutionMode::Sequential => run_sequential(&executor, &request.subtasks, cancel).await?,
            ExecutionMode::Parallel => run_parallel(&executor, &request.subtasks, cancel).await?,
        };

        let subtasks: Vec<SubtaskOutcome> = request
            .subtasks
            .iter()
            .zip(&tasks)
            .enumerate()
            .map(|(index, (spec, task))| match task {
                Some(task) => SubtaskOutcome::from_task(index, spec, task, request.aggregate_results),
                None => SubtaskOutcome::skipped(index, spec),
            })
            .collect();
        let summary = ExecutionSummary::from_tasks(tasks.iter().flatten());

        info!(
            "Delegation {} finished: {}/{} completed",
            delegation_id, summary.completed, summary.total
        );
        Ok(DelegationReport {
            delegation_id,
            main_task: request.main_task,
            mode: request.execution_mode,
            max_concurrent: concurrency,
            finished: true,
            subtasks,
            summary,
            status: None,
        })
    }

    /// Status of a background delegation
    pub async fn status(&self, delegation_id: &str) -> Result<Option<ExecutorStatus>> {
        let background = self.background.lock().await;
        match background.get(delegation_id) {
            Some(delegation) => Ok(Some(delegation.status().await?)),
            None => Ok(None),
        }
    }

    /// Tasks of a background delegation so far, in creation order.
    ///
    /// Reading the results of a finished delegation also forgets it.
    pub async fn results(&self, delegation_id: &str) -> Result<Option<Vec<SubAgentTask>>> {
        let mut background = self.background.lock().await;
        let Some(delegation) = background.get(delegation_id) else {
            return Ok(None);
        };
        let finished = delegation.is_finished();
        let tasks = delegation.executor.aggregated_results().await?;
        if finished {
            background.remove(delegation_id);
            debug!("Delegation {} collected", delegation_id);
        }
        Ok(Some(tasks))
    }

    /// Drop a background delegation, cancelling whatever it still runs.
    /// Returns false for an unknown id.
    pub async fn forget(&self, delegation_id: &str) -> Result<bool> {
        let Some(delegation) = self.background.lock().await.remove(delegation_id) else {
            return Ok(false);
        };
        if !delegation.is_finished() {
            delegation.runner.abort();
            let cancelled = delegation.executor.shutdown().await?;
            info!(
                "Delegation {} forgotten, {} subtask(s) cancelled",
                delegation_id, cancelled
            );
        }
        Ok(true)
    }

    pub async fn background_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.background.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn start_background(
        &self,
        delegation_id: String,
        request: DelegationRequest,
        executor: SubAgentExecutor,
        cancel: CancellationToken,
    ) -> Result<DelegationReport> {
        let runner = match request.execution_mode {
            ExecutionMode::Parallel => {
                for spec in &request.subtasks {
                    executor.add_task(spec.to_params())?;
                }
                let watcher = executor.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            if let Err(e) = watcher.shutdown().await {
                                warn!("Failed to stop background delegation: {}", e);
                            }
                        }
                        _ = watcher.wait_for_completion() => {}
                    }
                })
            }
            ExecutionMode::Sequential => {
                let runner = executor.clone();
                let subtasks = request.subtasks.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_sequential(&runner, &subtasks, &cancel).await {
                        warn!("Background delegation stopped: {}", e);
                    }
                })
            }
        };

        let delegation = BackgroundDelegation {
            executor,
            subtasks: request.subtasks.len(),
            runner,
        };
        let status = delegation.status().await?;
        let max_concurrent = request.effective_concurrency();
        self.background
            .lock()
            .await
            .insert(delegation_id.clone(), delegation);
        debug!("Delegation {} continues in the background", delegation_id);

        let subtasks = request
            .subtasks
            .iter()
            .enumerate()
            .map(|(index, spec)| SubtaskOutcome::skipped(index, spec))
            .collect();
        Ok(DelegationReport {
            delegation_id,
            main_task: request.main_task,
            mode: request.execution_mode,
            max_concurrent,
            finished: false,
            subtasks,
            summary: ExecutionSummary::default(),
            status: Some(status),
        })
    }
}

/// Submit subtasks one at a time, each after the previous one finished.
///
/// After cancellation the remaining subtasks are never submitted.
async fn run_sequential(
    executor: &SubAgentExecutor,
    subtasks: &[SubtaskSpec],
    cancel: &CancellationToken,
) -> Result<Vec<Option<SubAgentTask>>> {
    let mut tasks = vec![None; subtasks.len()];
    for (index, spec) in subtasks.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(
                "Delegation cancelled, {} subtask(s) not started",
                subtasks.len() - index
            );
            break;
        }

        let id = executor.add_task(spec.to_params())?;
        let task = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                executor.cancel_task(&id).await?;
                executor.wait_for_task(&id).await?
            }
            task = executor.wait_for_task(&id) => task?,
        };
        debug!("Sequential subtask {} ended {}", index + 1, task.status);
        tasks[index] = Some(task);
    }
    Ok(tasks)
}

/// Submit everything at once and wait for the executor to drain
async fn run_parallel(
    executor: &SubAgentExecutor,
    subtasks: &[SubtaskSpec],
    cancel: &CancellationToken,
) -> Result<Vec<Option<SubAgentTask>>> {
    let ids = subtasks
        .iter()
        .map(|spec| executor.add_task(spec.to_params()))
        .collect::<Result<Vec<_>>>()?;

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            executor.shutdown().await?;
            executor.wait_for_completion().await?;
        }
        summary = executor.wait_for_completion() => {
            summary?;
        }
    }

    let mut tasks = Vec::with_capacity(ids.len());
    for id in &ids {
        tasks.push(Some(executor.wait_for_task(id).await?));
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::executor::testing::{FakeSpawner, Script};
    use std::time::Duration;

    fn delegator(spawner: FakeSpawner) -> (TaskDelegator, Arc<crate::agents::executor::testing::FakeState>) {
        let state = spawner.state.clone();
        (
            TaskDelegator::new(Arc::new(spawner), ExecutorConfig::default()),
            state,
        )
    }

    fn specs(tasks: &[&str]) -> Vec<SubtaskSpec> {
        tasks.iter().map(|t| SubtaskSpec::new(*t)).collect()
    }

    #[tokio::test]
    async fn test_validation_rejects_before_spawning() {
        let (delegator, state) = delegator(FakeSpawner::new(Script::succeed(1, "ok")));
        let cancel = CancellationToken::new();

        let cases = vec![
            DelegationRequest::new("  ", specs(&["Review the parser module"])),
            DelegationRequest::new("Audit", Vec::new()),
            DelegationRequest::new("Audit", specs(&["Review the parser module"; 11])),
            DelegationRequest::new("Audit", specs(&["Review the parser module", "too short"])),
            DelegationRequest::new(
                "Audit",
                vec![SubtaskSpec {
                    timeout: Some(1),
                    ..SubtaskSpec::new("Review the parser module")
                }],
            ),
        ];
        for request in cases {
            let err = delegator.delegate(request, &cancel).await.unwrap_err();
            assert!(err.is_validation(), "{err}");
        }
        assert!(state.started().is_empty());
    }

    #[tokio::test]
    async fn test_subtask_error_names_index() {
        let request = DelegationRequest::new("Audit", specs(&["Review the parser module", "tiny"]));
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("Subtask 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_aggregates_in_input_order() {
        let spawner = FakeSpawner::new(Script::succeed(10, "ok"))
            .with("Check the lexer tokens", vec![Script::succeed(30, "lexer fine")])
            .with("Check the parser rules", vec![Script::fail(5, 1, "parse error")])
            .with("Check the printer output", vec![Script::succeed(10, "printer fine")]);
        let (delegator, _) = delegator(spawner);

        let request = DelegationRequest::new(
            "Audit the compiler",
            specs(&[
                "Check the lexer tokens",
                "Check the parser rules",
                "Check the printer output",
            ]),
        );
        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();

        assert!(report.finished);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.summary.completed, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.subtasks[0].output.as_deref(), Some("lexer fine"));
        assert_eq!(report.subtasks[1].status, Some(TaskStatus::Failed));

        let text = report.render();
        assert!(text.contains("2 of 3 subtasks succeeded"), "{text}");
        assert!(text.contains("Error: Sub-agent exited with code 1: parse error"));
        assert!(text.find("lexer fine").unwrap() < text.find("printer fine").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_respects_concurrency_limit() {
        let (delegator, state) = delegator(FakeSpawner::new(Script::succeed(20, "ok")));
        let tasks: Vec<String> = (0..6).map(|i| format!("Independent subtask {i}")).collect();
        let request = DelegationRequest::new(
            "Fan out",
            tasks.iter().map(|t| SubtaskSpec::new(t.as_str())).collect(),
        )
        .with_max_concurrent(2);

        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.max_concurrent, 2);
        assert_eq!(report.summary.completed, 6);
        assert_eq!(state.peak(), 2);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let request = DelegationRequest::new("x", Vec::new()).with_max_concurrent(9);
        assert_eq!(request.effective_concurrency(), MAX_CONCURRENT_AGENTS);
        let request = request.with_max_concurrent(0);
        assert_eq!(request.effective_concurrency(), 1);
        let request = request.with_mode(ExecutionMode::Sequential).with_max_concurrent(5);
        assert_eq!(request.effective_concurrency(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_runs_in_input_order() {
        let (delegator, state) = delegator(FakeSpawner::new(Script::succeed(10, "ok")));
        let mut request = DelegationRequest::new(
            "Step by step",
            specs(&["First step of work", "Second step of work", "Third step of work"]),
        )
        .with_mode(ExecutionMode::Sequential);
        request.subtasks[2].priority = Some(TaskPriority::High);

        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.summary.completed, 3);
        assert_eq!(
            state.started(),
            vec!["First step of work", "Second step of work", "Third step of work"]
        );
        assert_eq!(state.peak(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_cancel_skips_remaining() {
        let spawner = FakeSpawner::new(Script::succeed(10, "ok")).with(
            "First step hangs forever",
            vec![Script::Hang {
                ignore_terminate: false,
            }],
        );
        let (delegator, state) = delegator(spawner);
        let request = DelegationRequest::new(
            "Step by step",
            specs(&["First step hangs forever", "Second step of work"]),
        )
        .with_mode(ExecutionMode::Sequential);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = delegator.delegate(request, &cancel).await.unwrap();

        assert_eq!(report.subtasks[0].status, Some(TaskStatus::Cancelled));
        assert_eq!(report.subtasks[1].status, None);
        assert_eq!(state.started(), vec!["First step hangs forever"]);
        assert!(report.render().contains("skipped (not started)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_cancel_terminates_everything() {
        let spawner = FakeSpawner::new(Script::Hang {
            ignore_terminate: false,
        });
        let (delegator, _) = delegator(spawner);
        let request = DelegationRequest::new(
            "Hang",
            specs(&["Hanging subtask one", "Hanging subtask two", "Hanging subtask three", "Hanging subtask four"]),
        )
        .with_max_concurrent(2);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = delegator.delegate(request, &cancel).await.unwrap();
        assert_eq!(report.summary.cancelled, 4);
        assert_eq!(report.succeeded(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_delegation_reports_snapshot() {
        let (delegator, _) = delegator(FakeSpawner::new(Script::succeed(100, "ok")));
        let request = DelegationRequest::new(
            "Background work",
            specs(&["Background subtask one", "Background subtask two"]),
        )
        .in_background();

        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();
        assert!(!report.finished);
        assert_eq!(report.status.unwrap().total, 2);
        assert!(report.render().contains("running in the background"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = delegator.status(&report.delegation_id).await.unwrap().unwrap();
        assert_eq!(status.completed, 2);
        assert_eq!(delegator.background_ids().await, vec![report.delegation_id.clone()]);
        assert_eq!(
            delegator.results(&report.delegation_id).await.unwrap().unwrap().len(),
            2
        );
        assert!(delegator.status("unknown").await.unwrap().is_none());

        // Finished results are handed out once
        assert!(delegator.background_ids().await.is_empty());
        assert!(delegator.status(&report.delegation_id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sequential_counts_unsubmitted_as_pending() {
        let (delegator, state) = delegator(FakeSpawner::new(Script::succeed(100, "ok")));
        let request = DelegationRequest::new(
            "Background steps",
            specs(&["First background step", "Second background step"]),
        )
        .with_mode(ExecutionMode::Sequential)
        .in_background();

        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();
        let snapshot = report.status.clone().unwrap();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.pending + snapshot.running, 2);
        assert!(!report.render().contains("Pending: 0, Running: 0"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let status = delegator.status(&report.delegation_id).await.unwrap().unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.completed, 1);
        assert_eq!(status.pending + status.running, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = delegator.status(&report.delegation_id).await.unwrap().unwrap();
        assert_eq!(status.completed, 2);
        assert!(status.is_idle());
        assert_eq!(
            state.started(),
            vec!["First background step", "Second background step"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfinished_results_are_kept() {
        let (delegator, _) = delegator(FakeSpawner::new(Script::succeed(100, "ok")));
        let request = DelegationRequest::new("Slow work", specs(&["Slow background subtask"])).in_background();

        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();
        let tasks = delegator.results(&report.delegation_id).await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(!tasks[0].is_terminal());
        assert_eq!(delegator.background_ids().await, vec![report.delegation_id.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_cancels_running_delegation() {
        let spawner = FakeSpawner::new(Script::Hang {
            ignore_terminate: false,
        });
        let (delegator, state) = delegator(spawner);
        let request = DelegationRequest::new(
            "Hang",
            specs(&["Hanging background one", "Hanging background two"]),
        )
        .in_background();

        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.started().len(), 2);

        assert!(delegator.forget(&report.delegation_id).await.unwrap());
        assert!(delegator.background_ids().await.is_empty());
        assert!(!delegator.forget(&report.delegation_id).await.unwrap());
        assert!(!delegator.forget("unknown").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_aggregation_omits_output() {
        let (delegator, _) = delegator(FakeSpawner::new(Script::succeed(5, "secret output")));
        let request = DelegationRequest::new("Quiet", specs(&["Produce some output"])).without_aggregation();

        let report = delegator.delegate(request, &CancellationToken::new()).await.unwrap();

        assert!(report.subtasks[0].output.is_none());
        assert!(!report.render().contains("secret output"));
        assert!(report.all_succeeded());
    }

    #[test]
    fn test_request_from_camel_case_json() {
        let request: DelegationRequest = serde_json::from_value(serde_json::json!({
            "mainTask": "Audit",
            "subtasks": [{"task": "Review the parser module", "workingDirectory": "crates/core", "priority": "high"}],
            "executionMode": "sequential"
        }))
        .unwrap();

        assert_eq!(request.execution_mode, ExecutionMode::Sequential);
        assert_eq!(request.max_concurrent_agents, DEFAULT_MAX_CONCURRENT_AGENTS);
        assert!(request.wait_for_completion);
        assert!(request.aggregate_results);
        let params = request.subtasks[0].to_params();
        assert_eq!(params.working_directory.as_deref(), Some("crates/core"));
        assert_eq!(params.priority, TaskPriority::High);
    }
}
