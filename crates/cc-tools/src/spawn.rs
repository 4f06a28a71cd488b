//! spawn_sub_agent tool
//!
//! Runs one task in a sub-agent process and waits for its result.

use std::sync::Arc;

use async_trait::async_trait;
use cc_core::agents::{
    ExecutionSummary, ExecutorConfig, ProcessSpawner, SubAgentExecutor, SubAgentParams,
    TaskPriority, TaskStatus, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};
use cc_core::tool::{ConfirmationDetails, SchemaBuilder, ToolContext};
use cc_core::{Error, Result, Tool, ToolResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Properties shared by a single sub-agent task and a delegated subtask
pub(crate) fn subtask_schema() -> SchemaBuilder {
    SchemaBuilder::object()
        .string("task", "What the sub-agent should do (at least 10 characters)", true)
        .string("context", "Background the sub-agent needs", false)
        .integer_range(
            "timeout",
            "Seconds before the sub-agent is terminated (default: 120)",
            MIN_TIMEOUT_SECS as i64,
            MAX_TIMEOUT_SECS as i64,
            false,
        )
        .string_enum("priority", "Scheduling priority", &["low", "medium", "high"], false)
        .string(
            "workingDirectory",
            "Relative directory to run in (no '..')",
            false,
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpawnInput {
    task: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    priority: Option<TaskPriority>,
    #[serde(default)]
    working_directory: Option<String>,
}

impl From<SpawnInput> for SubAgentParams {
    fn from(input: SpawnInput) -> Self {
        SubAgentParams {
            task: input.task,
            context: input.context,
            timeout_secs: input.timeout,
            priority: input.priority.unwrap_or_default(),
            working_directory: input.working_directory,
        }
    }
}

fn parse(input: &Value) -> Result<SubAgentParams> {
    let input: SpawnInput = serde_json::from_value(input.clone())
        .map_err(|e| Error::validation(format!("Invalid input: {}", e)))?;
    let params = SubAgentParams::from(input);
    params.validate()?;
    Ok(params)
}

pub struct SpawnSubAgentTool {
    spawner: Arc<dyn ProcessSpawner>,
    config: ExecutorConfig,
}

impl SpawnSubAgentTool {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, config: ExecutorConfig) -> Self {
        Self {
            spawner,
            config: config.with_max_concurrent(1),
        }
    }
}

#[async_trait]
impl Tool for SpawnSubAgentTool {
    fn name(&self) -> &str {
        "spawn_sub_agent"
    }

    fn description(&self) -> &str {
        "Run a single self-contained task in a separate sub-agent process and return its output."
    }

    fn input_schema(&self) -> Value {
        subtask_schema().build()
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse(input).map(|_| ())
    }

    fn requires_confirmation(&self, input: &Value) -> Option<ConfirmationDetails> {
        let params = parse(input).ok()?;
        Some(ConfirmationDetails::new(
            self.name(),
            "Spawn sub-agent",
            params.task,
        ))
    }

    async fn execute(&self, input: Value, ctx: ToolContext) -> Result<ToolResult> {
        let params = parse(&input)?;
        let executor = SubAgentExecutor::new(self.spawner.clone(), self.config.clone());
        let id = executor.add_task(params)?;
        ctx.report_progress(&format!("Sub-agent {} started", id));

        let task = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                executor.cancel_task(&id).await?;
                executor.wait_for_task(&id).await?
            }
            task = executor.wait_for_task(&id) => task?,
        };
        debug!(call_id = %ctx.call_id, task_id = %task.id, "Sub-agent ended {}", task.status);

        if task.status == TaskStatus::Cancelled {
            return Err(Error::Cancelled(format!("sub-agent {}", task.id)));
        }

        let summary = ExecutionSummary::from_tasks([&task]);
        let data = json!({
            "taskId": task.id,
            "status": task.status,
            "attempt": task.attempt,
            "durationMs": task.duration_ms(),
            "summary": summary,
        });

        let result = match (task.status, &task.result, &task.error) {
            (TaskStatus::Completed, result, _) => {
                ToolResult::success(result.clone().unwrap_or_default())
            }
            (_, _, Some(error)) => ToolResult::error(error.message.clone()),
            (status, _, None) => ToolResult::error(format!("Sub-agent ended {}", status)),
        };
        Ok(result.with_data(data))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use cc_core::agents::CommandSpawner;
    use tokio_util::sync::CancellationToken;

    fn tool(script: &str, base: &std::path::Path) -> SpawnSubAgentTool {
        let spawner = CommandSpawner::new("sh").with_args(["-c", script]);
        SpawnSubAgentTool::new(
            Arc::new(spawner),
            ExecutorConfig::default().with_base_dir(base),
        )
    }

    #[test]
    fn test_validation() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool("true", dir.path());

        assert!(tool.validate(&json!({"task": "Summarize the changelog"})).is_ok());
        for bad in [
            json!({"task": "short"}),
            json!({"task": "Summarize the changelog", "timeout": 4}),
            json!({"task": "Summarize the changelog", "timeout": 301}),
            json!({"task": "Summarize the changelog", "workingDirectory": "../up"}),
            json!({"task": "Summarize the changelog", "priority": "urgent"}),
        ] {
            assert!(tool.validate(&bad).unwrap_err().is_validation(), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let tool = tool(r#"echo "$1 in $(basename "$PWD")""#, dir.path());

        let result = tool
            .execute(
                json!({"task": "Summarize the changelog", "workingDirectory": "sub"}),
                ToolContext::new("call-1", CancellationToken::new()),
            )
            .await
            .unwrap();

        assert!(!result.is_error);
        assert_eq!(result.output.trim(), "Summarize the changelog in sub");
        let data = result.data.unwrap();
        assert_eq!(data["status"], "completed");
        assert_eq!(data["summary"]["completed"], 1);
    }

    #[tokio::test]
    async fn test_failure_returns_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool("echo broken >&2; exit 4", dir.path());

        let result = tool
            .execute(
                json!({"task": "Summarize the changelog"}),
                ToolContext::new("call-1", CancellationToken::new()),
            )
            .await
            .unwrap();

        assert!(result.is_error);
        assert_eq!(result.output, "Sub-agent exited with code 4: broken");
    }

    #[tokio::test]
    async fn test_cancel_terminates_sub_agent() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool("sleep 30", dir.path());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = tool
            .execute(
                json!({"task": "Summarize the changelog"}),
                ToolContext::new("call-1", cancel),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
