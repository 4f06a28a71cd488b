//! delegate_task tool
//!
//! Splits a main task into subtasks and runs them as sub-agents.

use std::sync::Arc;

use async_trait::async_trait;
use cc_core::agents::{DelegationRequest, TaskDelegator, MAX_CONCURRENT_AGENTS, MAX_SUBTASKS};
use cc_core::tool::{ConfirmationDetails, SchemaBuilder, ToolContext};
use cc_core::{Error, Result, Tool, ToolResult};
use serde_json::{json, Value};
use tracing::info;

use crate::spawn::subtask_schema;

pub struct DelegateTaskTool {
    delegator: Arc<TaskDelegator>,
}

impl DelegateTaskTool {
    pub fn new(delegator: Arc<TaskDelegator>) -> Self {
        Self { delegator }
    }

    pub fn delegator(&self) -> &Arc<TaskDelegator> {
        &self.delegator
    }
}

fn parse(input: &Value) -> Result<DelegationRequest> {
    let request: DelegationRequest = serde_json::from_value(input.clone())
        .map_err(|e| Error::validation(format!("Invalid input: {}", e)))?;
    request.validate()?;
    Ok(request)
}

#[async_trait]
impl Tool for DelegateTaskTool {
    fn name(&self) -> &str {
        "delegate_task"
    }

    fn description(&self) -> &str {
        "Split a larger task into independent subtasks and run each one in its own sub-agent process. \
         Subtasks run in parallel (default) or sequentially, and the results are aggregated into one report."
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::object()
            .string("mainTask", "The overall goal the subtasks serve", true)
            .array(
                "subtasks",
                "Independent units of work",
                subtask_schema().build(),
                1,
                MAX_SUBTASKS,
                true,
            )
            .string_enum(
                "executionMode",
                "Run subtasks together or one after another (default: parallel)",
                &["parallel", "sequential"],
                false,
            )
            .integer_range(
                "maxConcurrentAgents",
                "Parallel mode only (default: 3)",
                1,
                MAX_CONCURRENT_AGENTS as i64,
                false,
            )
            .boolean(
                "waitForCompletion",
                "Wait for every subtask before returning (default: true)",
                false,
            )
            .boolean(
                "aggregateResults",
                "Include each subtask's output in the report (default: true)",
                false,
            )
            .build()
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse(input).map(|_| ())
    }

    fn requires_confirmation(&self, input: &Value) -> Option<ConfirmationDetails> {
        let request = parse(input).ok()?;
        let tasks: Vec<String> = request
            .subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.task))
            .collect();
        Some(ConfirmationDetails::new(
            self.name(),
            format!(
                "Delegate {} subtask(s) ({})",
                request.subtasks.len(),
                request.execution_mode.as_str()
            ),
            tasks.join("\n"),
        ))
    }

    async fn execute(&self, input: Value, ctx: ToolContext) -> Result<ToolResult> {
        let request = parse(&input)?;
        ctx.report_progress(&format!(
            "Delegating {} subtask(s) in {} mode",
            request.subtasks.len(),
            request.execution_mode.as_str()
        ));

        let report = self.delegator.delegate(request, &ctx.cancel).await?;
        if ctx.is_cancelled() {
            return Err(Error::Cancelled(format!(
                "delegation {} stopped",
                report.delegation_id
            )));
        }
        info!(call_id = %ctx.call_id, "Delegation {} returned", report.delegation_id);

        let text = report.render();
        let all_failed = report.finished && report.succeeded() == 0;
        let data = json!({
            "delegationId": report.delegation_id,
            "finished": report.finished,
            "summary": report.summary,
            "subtasks": report.subtasks,
            "status": report.status,
        });
        let result = if all_failed {
            ToolResult::error(text)
        } else {
            ToolResult::success(text)
        };
        Ok(result.with_data(data))
    }
}
