//! Bash command execution tool
//!
//! Executes shell commands with optional timeout. Every command needs
//! approval, keyed by its first word.

use async_trait::async_trait;
use cc_core::tool::{ConfirmationDetails, SchemaBuilder, ToolContext};
use cc_core::{Error, Result, Tool, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Bash tool for executing shell commands
pub struct BashTool;

/// Input parameters for the bash tool
#[derive(Debug, Deserialize)]
struct BashInput {
    /// The command to execute
    command: String,
    /// Timeout in milliseconds (default: 120000)
    #[serde(default = "default_timeout")]
    timeout_ms: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Output from bash execution
#[derive(Debug, Serialize)]
struct BashOutput {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

fn parse(input: &Value) -> Result<BashInput> {
    let input: BashInput = serde_json::from_value(input.clone())
        .map_err(|e| Error::validation(format!("Invalid input: {}", e)))?;
    if input.command.trim().is_empty() {
        return Err(Error::validation("command must not be empty"));
    }
    Ok(input)
}

/// First word of the command, e.g. `git` for `git status`
fn command_root(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command with optional timeout. Use this for terminal operations like git, cargo, docker, etc."
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::object()
            .string("command", "The command to execute", true)
            .property(
                "timeout_ms",
                json!({
                    "type": "integer",
                    "description": "Timeout in milliseconds (default: 120000, max: 600000)",
                    "default": DEFAULT_TIMEOUT_MS,
                    "maximum": MAX_TIMEOUT_MS
                }),
                false,
            )
            .build()
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse(input).map(|_| ())
    }

    fn requires_confirmation(&self, input: &Value) -> Option<ConfirmationDetails> {
        let input = parse(input).ok()?;
        let root = command_root(&input.command).to_string();
        Some(ConfirmationDetails::new(root, "Run shell command", input.command))
    }

    async fn execute(&self, input: Value, ctx: ToolContext) -> Result<ToolResult> {
        let bash_input = parse(&input)?;
        let timeout_ms = bash_input.timeout_ms.min(MAX_TIMEOUT_MS);

        tracing::debug!(
            call_id = %ctx.call_id,
            command = %bash_input.command,
            timeout_ms = timeout_ms,
            "Executing bash command"
        );

        // Dropping the future on cancel or timeout kills the child.
        let output = Command::new("bash")
            .arg("-c")
            .arg(&bash_input.command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                return Err(Error::Cancelled(format!("bash: {}", bash_input.command)));
            }
            () = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                return Err(Error::Timeout {
                    after: Duration::from_millis(timeout_ms),
                });
            }
            output = output => output,
        };

        match output {
            Ok(output) => {
                let bash_output = BashOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code(),
                };
                let text = serde_json::to_string_pretty(&bash_output)?;

                // Return as error if exit code is non-zero
                if output.status.success() {
                    Ok(ToolResult::success(text))
                } else {
                    Ok(ToolResult::error(text))
                }
            }
            Err(e) => Ok(ToolResult::error(format!(
                "Failed to execute command: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        ToolContext::new("call-1", CancellationToken::new())
    }

    #[tokio::test]
    async fn test_bash_echo() {
        let result = BashTool
            .execute(json!({"command": "echo hello"}), ctx())
            .await
            .unwrap();

        assert!(!result.is_error);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn test_bash_failure() {
        let result = BashTool
            .execute(json!({"command": "exit 1"}), ctx())
            .await
            .unwrap();

        assert!(result.is_error);
        assert!(result.output.contains("\"exit_code\": 1"));
    }

    #[tokio::test]
    async fn test_bash_timeout() {
        let input = json!({
            "command": "sleep 10",
            "timeout_ms": 100
        });
        let err = BashTool.execute(input, ctx()).await.unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(err.to_string(), "Timed out after 100ms");
    }

    #[tokio::test]
    async fn test_bash_cancelled() {
        let ctx = ctx();
        ctx.cancel.cancel();

        let err = BashTool
            .execute(json!({"command": "sleep 10"}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[test]
    fn test_validate() {
        assert!(BashTool.validate(&json!({"command": "ls"})).is_ok());
        assert!(BashTool.validate(&json!({"command": "  "})).unwrap_err().is_validation());
        assert!(BashTool.validate(&json!({})).unwrap_err().is_validation());
    }

    #[test]
    fn test_confirmation_root_is_first_word() {
        let details = BashTool
            .requires_confirmation(&json!({"command": "git status --short"}))
            .unwrap();
        assert_eq!(details.root, "git");
        assert_eq!(details.description, "git status --short");

        let details = BashTool
            .requires_confirmation(&json!({"command": "  cargo test -p cc-core"}))
            .unwrap();
        assert_eq!(details.root, "cargo");
        assert_eq!(details.title, "Run shell command");
        assert_eq!(details.description, "  cargo test -p cc-core");
    }
}
