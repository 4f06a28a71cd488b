//! Sub-agent executor
//!
//! A bounded, priority-ordered queue of sub-agent tasks. All bookkeeping
//! lives in a single actor task; handles talk to it over a command
//! channel and process runners report back over a second channel. A slot
//! is held from the moment a task starts until its process is gone, so
//! the number of live processes never exceeds `max_concurrent`.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::spawner::{AgentProcess, ProcessExit, ProcessSignal, ProcessSpawner, SpawnRequest};
use super::types::{
    ExecutionSummary, ExecutorEvent, ExecutorStatus, FailureKind, RetryPolicy, SubAgentParams,
    SubAgentTask, TaskError, TaskId, TaskPriority, TaskStatus, DEFAULT_MAX_CONCURRENT_AGENTS,
    DEFAULT_TIMEOUT_SECS, MAX_CONCURRENT_AGENTS,
};
use crate::config::AgentsConfig;
use crate::error::format_duration;
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 256;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrent: usize,
    /// Used when a task does not carry its own timeout
    pub default_timeout: Duration,
    /// Delay between graceful and forced termination
    pub grace_period: Duration,
    pub retry: RetryPolicy,
    /// Task working directories are resolved against this
    pub base_dir: PathBuf,
    /// Extra environment for every spawned process
    pub env: HashMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_AGENTS,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            grace_period: Duration::from_millis(200),
            retry: RetryPolicy::none(),
            base_dir: PathBuf::from("."),
            env: HashMap::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_agents(config: &AgentsConfig) -> Self {
        let config = config.clone().normalized();
        Self {
            max_concurrent: config.max_concurrent_agents,
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            grace_period: Duration::from_millis(config.grace_period_ms),
            retry: RetryPolicy::attempts(config.max_attempts),
            ..Self::default()
        }
    }

    /// Clamped to `1..=MAX_CONCURRENT_AGENTS`
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.clamp(1, MAX_CONCURRENT_AGENTS);
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }
}

enum Command {
    Add(SubAgentTask),
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<Result<TaskStatus>>,
    },
    CancelAll(oneshot::Sender<usize>),
    Status(oneshot::Sender<ExecutorStatus>),
    Results(oneshot::Sender<Vec<SubAgentTask>>),
    Task {
        id: TaskId,
        reply: oneshot::Sender<Option<SubAgentTask>>,
    },
    WaitAll(oneshot::Sender<ExecutionSummary>),
    WaitTask {
        id: TaskId,
        reply: oneshot::Sender<Result<SubAgentTask>>,
    },
}

/// Cheap-to-clone handle to a running executor
#[derive(Clone)]
pub struct SubAgentExecutor {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ExecutorEvent>,
    max_concurrent: usize,
}

impl SubAgentExecutor {
    /// Start an executor. Must be called within a Tokio runtime.
    pub fn new(spawner: Arc<dyn ProcessSpawner>, config: ExecutorConfig) -> Self {
        let config = ExecutorConfig {
            max_concurrent: config.max_concurrent.clamp(1, MAX_CONCURRENT_AGENTS),
            ..config
        };
        let max_concurrent = config.max_concurrent;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let state = ExecutorState {
            config,
            spawner,
            tasks: HashMap::new(),
            order: Vec::new(),
            queue: BinaryHeap::new(),
            running: HashMap::new(),
            retried_as: HashMap::new(),
            peak_running: 0,
            next_seq: 0,
            all_waiters: Vec::new(),
            task_waiters: HashMap::new(),
            finished_tx,
            events: events.clone(),
        };
        tokio::spawn(state.run(command_rx, finished_rx));

        Self {
            commands,
            events,
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Validate and enqueue a task; returns its id immediately
    pub fn add_task(&self, params: SubAgentParams) -> Result<TaskId> {
        params.validate()?;
        let task = SubAgentTask::new(params);
        let id = task.id.clone();
        self.commands
            .send(Command::Add(task))
            .map_err(|_| executor_closed())?;
        Ok(id)
    }

    /// Cancel a task. Pending tasks never start; running ones are
    /// terminated. Already-terminal tasks are left as they are.
    pub async fn cancel_task(&self, id: &TaskId) -> Result<TaskStatus> {
        let id = id.clone();
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    /// Cancel everything that has not finished; returns how many were cancelled
    pub async fn shutdown(&self) -> Result<usize> {
        self.request(Command::CancelAll).await
    }

    /// Resolves once nothing is pending or running
    pub async fn wait_for_completion(&self) -> Result<ExecutionSummary> {
        self.request(Command::WaitAll).await
    }

    /// Resolves with the terminal snapshot of a task, following retries
    pub async fn wait_for_task(&self, id: &TaskId) -> Result<SubAgentTask> {
        let id = id.clone();
        self.request(|reply| Command::WaitTask { id, reply }).await?
    }

    /// Every task in creation order
    pub async fn aggregated_results(&self) -> Result<Vec<SubAgentTask>> {
        self.request(Command::Results).await
    }

    pub async fn task(&self, id: &TaskId) -> Result<Option<SubAgentTask>> {
        let id = id.clone();
        self.request(|reply| Command::Task { id, reply }).await
    }

    pub async fn status(&self) -> Result<ExecutorStatus> {
        self.request(Command::Status).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| executor_closed())?;
        rx.await.map_err(|_| executor_closed())
    }
}

fn executor_closed() -> Error {
    Error::Other("sub-agent executor has stopped".to_string())
}

/// Queue entry: higher priority first, then earlier insertion
#[derive(Debug, PartialEq, Eq)]
struct Queued {
    priority: TaskPriority,
    seq: Reverse<u64>,
    id: TaskId,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
enum RunOutcome {
    Exited(ProcessExit),
    TimedOut(Duration),
    Cancelled,
    Lost(String),
}

struct Finished {
    id: TaskId,
    outcome: RunOutcome,
}

struct ExecutorState {
    config: ExecutorConfig,
    spawner: Arc<dyn ProcessSpawner>,
    tasks: HashMap<TaskId, SubAgentTask>,
    order: Vec<TaskId>,
    queue: BinaryHeap<Queued>,
    /// Occupied slots, released only when the runner reports back
    running: HashMap<TaskId, CancellationToken>,
    retried_as: HashMap<TaskId, TaskId>,
    peak_running: usize,
    next_seq: u64,
    all_waiters: Vec<oneshot::Sender<ExecutionSummary>>,
    task_waiters: HashMap<TaskId, Vec<oneshot::Sender<Result<SubAgentTask>>>>,
    finished_tx: mpsc::UnboundedSender<Finished>,
    events: broadcast::Sender<ExecutorEvent>,
}

impl ExecutorState {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut finished: mpsc::UnboundedReceiver<Finished>,
    ) {
        let mut handles_alive = true;
        loop {
            tokio::select! {
                biased;
                Some(done) = finished.recv() => self.on_finished(done),
                command = commands.recv(), if handles_alive => match command {
                    Some(command) => self.handle(command),
                    None => handles_alive = false,
                },
            }

            self.fill_slots();
            self.resolve_idle_waiters();

            if !handles_alive && self.is_idle() {
                debug!("Executor handles dropped and queue drained, stopping");
                break;
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add(task) => self.enqueue(task),
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(&id));
            }
            Command::CancelAll(reply) => {
                let ids: Vec<TaskId> = self
                    .order
                    .iter()
                    .filter(|id| self.tasks.get(*id).is_some_and(|t| !t.is_terminal()))
                    .cloned()
                    .collect();
                let count = ids.len();
                for id in ids {
                    let _ = self.cancel(&id);
                }
                if count > 0 {
                    info!("Cancelled {} outstanding sub-agent task(s)", count);
                }
                let _ = reply.send(count);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Results(reply) => {
                let results = self
                    .order
                    .iter()
                    .filter_map(|id| self.tasks.get(id).cloned())
                    .collect();
                let _ = reply.send(results);
            }
            Command::Task { id, reply } => {
                let _ = reply.send(self.tasks.get(&id).cloned());
            }
            Command::WaitAll(reply) => self.all_waiters.push(reply),
            Command::WaitTask { id, reply } => {
                if !self.tasks.contains_key(&id) {
                    let _ = reply.send(Err(Error::TaskNotFound(id.to_string())));
                    return;
                }
                let latest = self.latest_attempt(&id);
                match self.tasks.get(&latest) {
                    Some(task) if task.is_terminal() => {
                        let _ = reply.send(Ok(task.clone()));
                    }
                    _ => self.task_waiters.entry(latest).or_default().push(reply),
                }
            }
        }
    }

    fn enqueue(&mut self, task: SubAgentTask) {
        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(
            "Queued sub-agent task {} (priority={}, attempt={})",
            task.id,
            task.params.priority.as_str(),
            task.attempt
        );
        self.queue.push(Queued {
            priority: task.params.priority,
            seq: Reverse(seq),
            id: task.id.clone(),
        });
        self.emit(ExecutorEvent::Queued {
            id: task.id.clone(),
            priority: task.params.priority,
        });
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    fn fill_slots(&mut self) {
        while self.running.len() < self.config.max_concurrent {
            let Some(entry) = self.queue.pop() else {
                break;
            };
            let Some(task) = self.tasks.get_mut(&entry.id) else {
                continue;
            };
            // Cancelled while queued
            if task.status != TaskStatus::Pending {
                continue;
            }

            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            let attempt = task.attempt;
            let timeout = task
                .params
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.config.default_timeout);
            let working_dir = match &task.params.working_directory {
                Some(dir) => self.config.base_dir.join(dir),
                None => self.config.base_dir.clone(),
            };
            let request = SpawnRequest {
                prompt: task.params.prompt(),
                working_dir,
                env: self.config.env.clone(),
            };

            let cancel = CancellationToken::new();
            self.running.insert(entry.id.clone(), cancel.clone());
            self.peak_running = self.peak_running.max(self.running.len());
            info!(
                "Starting sub-agent task {} ({}/{} slots, timeout {})",
                entry.id,
                self.running.len(),
                self.config.max_concurrent,
                format_duration(&timeout)
            );
            self.emit(ExecutorEvent::Started {
                id: entry.id.clone(),
                attempt,
            });

            let spawner = self.spawner.clone();
            let grace = self.config.grace_period;
            let finished = self.finished_tx.clone();
            let id = entry.id;
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(run_attempt(spawner, request, timeout, grace, cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| RunOutcome::Lost("sub-agent runner panicked".to_string()));
                let _ = finished.send(Finished { id, outcome });
            });
        }
    }

    fn on_finished(&mut self, done: Finished) {
        self.running.remove(&done.id);

        let Some(task) = self.tasks.get_mut(&done.id) else {
            return;
        };
        if task.is_terminal() {
            debug!("Sub-agent task {} already {}, slot released", done.id, task.status);
            return;
        }

        match done.outcome {
            RunOutcome::Exited(exit) if exit.success() => {
                task.status = TaskStatus::Completed;
                task.result = Some(exit.stdout.trim().to_string());
            }
            RunOutcome::Exited(exit) => {
                task.status = TaskStatus::Failed;
                task.error = Some(TaskError::new(FailureKind::Execution, exit.diagnostic()));
            }
            RunOutcome::TimedOut(after) => {
                task.status = TaskStatus::Failed;
                task.error = Some(TaskError::new(
                    FailureKind::Timeout,
                    format!("{} and was terminated", Error::Timeout { after }),
                ));
            }
            RunOutcome::Cancelled => {
                task.status = TaskStatus::Cancelled;
                task.error = Some(TaskError::new(FailureKind::Cancelled, "Cancelled while running"));
            }
            RunOutcome::Lost(message) => {
                task.status = TaskStatus::Failed;
                task.error = Some(TaskError::new(FailureKind::Execution, message));
            }
        }
        task.completed_at = Some(Utc::now());

        let snapshot = task.clone();
        match &snapshot.error {
            Some(e) => warn!("Sub-agent task {} {}: {}", snapshot.id, snapshot.status, e),
            None => info!(
                "Sub-agent task {} completed in {}ms",
                snapshot.id,
                snapshot.duration_ms().unwrap_or(0)
            ),
        }
        self.emit(ExecutorEvent::Finished(snapshot.clone()));

        if self.config.retry.should_retry(&snapshot) {
            let retry = snapshot.retry();
            info!(
                "Retrying sub-agent task {} as {} (attempt {}/{})",
                snapshot.id, retry.id, retry.attempt, self.config.retry.max_attempts
            );
            self.retried_as.insert(snapshot.id.clone(), retry.id.clone());
            if let Some(waiters) = self.task_waiters.remove(&snapshot.id) {
                self.task_waiters.insert(retry.id.clone(), waiters);
            }
            self.enqueue(retry);
        } else {
            self.resolve_task_waiters(&snapshot);
        }
    }

    fn cancel(&mut self, id: &TaskId) -> Result<TaskStatus> {
        if !self.tasks.contains_key(id) {
            return Err(Error::TaskNotFound(id.to_string()));
        }
        let latest = self.latest_attempt(id);
        let Some(task) = self.tasks.get_mut(&latest) else {
            return Err(Error::TaskNotFound(latest.to_string()));
        };

        let message = match task.status {
            TaskStatus::Pending => "Cancelled before start",
            TaskStatus::Running => {
                if let Some(token) = self.running.get(&latest) {
                    token.cancel();
                }
                "Cancelled while running"
            }
            status => return Ok(status),
        };

        task.status = TaskStatus::Cancelled;
        task.error = Some(TaskError::new(FailureKind::Cancelled, message));
        task.completed_at = Some(Utc::now());
        info!("Sub-agent task {}: {}", latest, message);

        let snapshot = task.clone();
        self.emit(ExecutorEvent::Finished(snapshot.clone()));
        self.resolve_task_waiters(&snapshot);
        Ok(TaskStatus::Cancelled)
    }

    fn latest_attempt(&self, id: &TaskId) -> TaskId {
        let mut current = id;
        while let Some(next) = self.retried_as.get(current) {
            current = next;
        }
        current.clone()
    }

    fn resolve_task_waiters(&mut self, task: &SubAgentTask) {
        if let Some(waiters) = self.task_waiters.remove(&task.id) {
            for waiter in waiters {
                let _ = waiter.send(Ok(task.clone()));
            }
        }
    }

    fn resolve_idle_waiters(&mut self) {
        if self.all_waiters.is_empty() || !self.is_idle() {
            return;
        }
        let summary = self.summary();
        for waiter in self.all_waiters.drain(..) {
            let _ = waiter.send(summary);
        }
    }

    /// Summary over final attempts only
    fn summary(&self) -> ExecutionSummary {
        ExecutionSummary::from_tasks(
            self.order
                .iter()
                .filter(|id| !self.retried_as.contains_key(*id))
                .filter_map(|id| self.tasks.get(id)),
        )
    }

    fn is_idle(&self) -> bool {
        self.running.is_empty()
            && !self
                .tasks
                .values()
                .any(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running))
    }

    fn status(&self) -> ExecutorStatus {
        let mut status = ExecutorStatus {
            total: self.tasks.len(),
            max_concurrent: self.config.max_concurrent,
            peak_running: self.peak_running,
            ..ExecutorStatus::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => status.pending += 1,
                TaskStatus::Running => status.running += 1,
                TaskStatus::Completed => status.completed += 1,
                TaskStatus::Failed => status.failed += 1,
                TaskStatus::Cancelled => status.cancelled += 1,
            }
        }
        status
    }

    fn emit(&self, event: ExecutorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Run one process to exit, timeout or cancellation
async fn run_attempt(
    spawner: Arc<dyn ProcessSpawner>,
    request: SpawnRequest,
    timeout: Duration,
    grace: Duration,
    cancel: CancellationToken,
) -> RunOutcome {
    let mut process = tokio::select! {
        biased;
        () = cancel.cancelled() => return RunOutcome::Cancelled,
        spawned = spawner.spawn(request) => match spawned {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to spawn sub-agent: {}", e);
                return RunOutcome::Lost(e.to_string());
            }
        },
    };

    let stop = tokio::select! {
        biased;
        () = cancel.cancelled() => RunOutcome::Cancelled,
        exit = process.wait() => {
            return match exit {
                Ok(exit) => RunOutcome::Exited(exit),
                Err(e) => RunOutcome::Lost(format!("Lost track of sub-agent process: {}", e)),
            };
        }
        () = tokio::time::sleep(timeout) => RunOutcome::TimedOut(timeout),
    };

    terminate(process.as_mut(), grace).await;
    stop
}

/// Graceful signal, then a forced kill once the grace period lapses
async fn terminate(process: &mut dyn AgentProcess, grace: Duration) {
    let pid = process.id();
    if let Err(e) = process.signal(ProcessSignal::Terminate) {
        warn!("Failed to signal sub-agent {:?}: {}", pid, e);
    }
    if tokio::time::timeout(grace, process.wait()).await.is_ok() {
        return;
    }

    warn!(
        "Sub-agent {:?} still alive after {}, killing",
        pid,
        format_duration(&grace)
    );
    if let Err(e) = process.signal(ProcessSignal::Kill) {
        warn!("Failed to kill sub-agent {:?}: {}", pid, e);
    }
    let _ = process.wait().await;
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeSpawner, Script};
    use super::*;
    use proptest::prelude::*;
    use tokio::time::Instant;

    fn executor(spawner: FakeSpawner, max: usize) -> (SubAgentExecutor, Arc<super::testing::FakeState>) {
        let state = spawner.state.clone();
        let config = ExecutorConfig::default().with_max_concurrent(max);
        (SubAgentExecutor::new(Arc::new(spawner), config), state)
    }

    fn params(task: &str) -> SubAgentParams {
        SubAgentParams::new(task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_to_completion() {
        let (executor, _) = executor(FakeSpawner::new(Script::succeed(50, " summary \n")), 2);
        let mut events = executor.subscribe();

        let id = executor.add_task(params("Summarize the README")).unwrap();
        let task = executor.wait_for_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("summary"));
        assert!(task.duration_ms().is_some());

        assert!(matches!(events.recv().await.unwrap(), ExecutorEvent::Queued { .. }));
        assert!(matches!(events.recv().await.unwrap(), ExecutorEvent::Started { attempt: 1, .. }));
        match events.recv().await.unwrap() {
            ExecutorEvent::Finished(done) => assert_eq!(done.id, id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_then_fifo_order() {
        let spawner = FakeSpawner::new(Script::succeed(10, "ok"))
            .with("blocking task first", vec![Script::succeed(100, "ok")]);
        let (executor, state) = executor(spawner, 1);

        executor.add_task(params("blocking task first")).unwrap();
        executor
            .add_task(params("low priority task").with_priority(TaskPriority::Low))
            .unwrap();
        executor.add_task(params("medium task one")).unwrap();
        executor
            .add_task(params("high priority task").with_priority(TaskPriority::High))
            .unwrap();
        executor.add_task(params("medium task two")).unwrap();

        let summary = executor.wait_for_completion().await.unwrap();

        assert_eq!(summary.completed, 5);
        assert_eq!(
            state.started(),
            vec![
                "blocking task first",
                "high priority task",
                "medium task one",
                "medium task two",
                "low priority task"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_terminates_gracefully() {
        let spawner = FakeSpawner::new(Script::Hang {
            ignore_terminate: false,
        });
        let (executor, state) = executor(spawner, 1);
        let started = Instant::now();

        let id = executor
            .add_task(params("Run a very long analysis").with_timeout(5))
            .unwrap();
        let task = executor.wait_for_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, FailureKind::Timeout);
        assert!(error.message.contains("5s"), "{}", error.message);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5) + Duration::from_millis(200) + Duration::from_millis(50));
        assert_eq!(
            state.signals_for("Run a very long analysis"),
            vec![ProcessSignal::Terminate]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_process_is_killed_after_grace() {
        let spawner = FakeSpawner::new(Script::Hang {
            ignore_terminate: true,
        });
        let (executor, state) = executor(spawner, 1);
        let started = Instant::now();

        let id = executor
            .add_task(params("Ignore polite requests").with_timeout(5))
            .unwrap();
        executor.wait_for_task(&id).await.unwrap();
        executor.wait_for_completion().await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5) + Duration::from_millis(200));
        assert_eq!(
            state.signals_for("Ignore polite requests"),
            vec![ProcessSignal::Terminate, ProcessSignal::Kill]
        );
        assert_eq!(state.live.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_task_never_starts() {
        let spawner = FakeSpawner::new(Script::Hang {
            ignore_terminate: false,
        });
        let (executor, state) = executor(spawner, 1);

        let running = executor.add_task(params("occupies the only slot")).unwrap();
        let queued = executor.add_task(params("waits in the queue")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(executor.cancel_task(&queued).await.unwrap(), TaskStatus::Cancelled);
        assert_eq!(executor.cancel_task(&running).await.unwrap(), TaskStatus::Cancelled);
        let summary = executor.wait_for_completion().await.unwrap();

        assert_eq!(summary.cancelled, 2);
        assert_eq!(state.started(), vec!["occupies the only slot"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_task_finishes_once() {
        let spawner = FakeSpawner::new(Script::Hang {
            ignore_terminate: false,
        });
        let (executor, state) = executor(spawner, 2);
        let mut events = executor.subscribe();

        let id = executor.add_task(params("Watch the log forever")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(executor.status().await.unwrap().running, 1);

        executor.cancel_task(&id).await.unwrap();
        let task = executor.wait_for_task(&id).await.unwrap();
        executor.wait_for_completion().await.unwrap();

        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(
            state.signals_for("Watch the log forever"),
            vec![ProcessSignal::Terminate]
        );
        // Cancelling again is a no-op
        assert_eq!(executor.cancel_task(&id).await.unwrap(), TaskStatus::Cancelled);

        let mut finished = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ExecutorEvent::Finished(_)) {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_and_terminal() {
        let (executor, _) = executor(FakeSpawner::new(Script::succeed(1, "done")), 1);

        let missing = executor.cancel_task(&TaskId::new("nope")).await;
        assert!(matches!(missing, Err(Error::TaskNotFound(_))));

        let id = executor.add_task(params("Finish quickly please")).unwrap();
        executor.wait_for_task(&id).await.unwrap();
        assert_eq!(executor.cancel_task(&id).await.unwrap(), TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_exit_reports_stderr() {
        let (executor, _) = executor(FakeSpawner::new(Script::fail(5, 2, "no such file")), 1);

        let id = executor.add_task(params("Read a missing file")).unwrap();
        let task = executor.wait_for_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, FailureKind::Execution);
        assert_eq!(error.message, "Sub-agent exited with code 2: no such file");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_follows_chain() {
        let spawner = FakeSpawner::new(Script::succeed(5, "ok")).with(
            "Flaky network fetch",
            vec![Script::fail(5, 1, "connection reset"), Script::succeed(5, "fetched")],
        );
        let state = spawner.state.clone();
        let config = ExecutorConfig {
            retry: RetryPolicy::attempts(2),
            ..ExecutorConfig::default()
        };
        let executor = SubAgentExecutor::new(Arc::new(spawner), config);

        let id = executor.add_task(params("Flaky network fetch")).unwrap();
        let task = executor.wait_for_task(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempt, 2);
        assert_eq!(task.retry_of.as_ref(), Some(&id));
        assert_eq!(task.result.as_deref(), Some("fetched"));
        assert_eq!(state.started().len(), 2);

        let all = executor.aggregated_results().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, TaskStatus::Failed);

        let summary = executor.wait_for_completion().await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.completed, 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_queueing() {
        let (executor, _) = executor(FakeSpawner::new(Script::succeed(1, "ok")), 1);

        let err = executor.add_task(params("short")).unwrap_err();
        assert!(err.is_validation());
        let err = executor
            .add_task(params("Summarize the README").with_working_directory("../escape"))
            .unwrap_err();
        assert!(err.is_validation());

        assert_eq!(executor.status().await.unwrap().total, 0);
        assert_eq!(executor.wait_for_completion().await.unwrap(), ExecutionSummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_outstanding() {
        let spawner = FakeSpawner::new(Script::Hang {
            ignore_terminate: false,
        });
        let (executor, _) = executor(spawner, 2);
        for i in 0..4 {
            executor.add_task(params(&format!("long running task {i}"))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(executor.shutdown().await.unwrap(), 4);
        let summary = executor.wait_for_completion().await.unwrap();
        assert_eq!(summary.cancelled, 4);
        assert_eq!(executor.status().await.unwrap().peak_running, 2);
    }

    #[test]
    fn test_config_from_agents_clamps() {
        let agents = AgentsConfig {
            max_concurrent_agents: 12,
            max_attempts: 0,
            ..AgentsConfig::default()
        };
        let config = ExecutorConfig::from_agents(&agents);
        assert_eq!(config.max_concurrent, MAX_CONCURRENT_AGENTS);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(ExecutorConfig::default().with_max_concurrent(0).max_concurrent, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_live_processes_never_exceed_limit(
            limit in 1usize..=5,
            jobs in proptest::collection::vec((0u64..20, 1u64..40, 0u8..3), 1..16),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let (peak_live, status, summary) = runtime.block_on(async {
                let mut spawner = FakeSpawner::new(Script::succeed(1, "ok"));
                for (i, (_, duration, _)) in jobs.iter().enumerate() {
                    spawner = spawner.with(
                        &format!("randomized job number {i}"),
                        vec![Script::succeed(*duration, "ok")],
                    );
                }
                let (executor, state) = executor(spawner, limit);

                for (i, (delay, _, priority)) in jobs.iter().enumerate() {
                    tokio::time::sleep(Duration::from_millis(*delay)).await;
                    let priority = match priority {
                        0 => TaskPriority::Low,
                        1 => TaskPriority::Medium,
                        _ => TaskPriority::High,
                    };
                    executor
                        .add_task(params(&format!("randomized job number {i}")).with_priority(priority))
                        .unwrap();
                }
                let summary = executor.wait_for_completion().await.unwrap();
                (state.peak(), executor.status().await.unwrap(), summary)
            });

            prop_assert!(peak_live <= limit);
            prop_assert!(status.peak_running <= limit);
            prop_assert_eq!(summary.completed, jobs.len());
        }
    }
}
