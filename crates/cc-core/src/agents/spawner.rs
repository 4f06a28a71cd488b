//! Sub-agent process spawning
//!
//! The executor talks to processes only through [`ProcessSpawner`] and
//! [`AgentProcess`], so tests can substitute scripted processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Environment variable set for every spawned sub-agent
pub const SUBAGENT_ENV: &str = "CC_SUBAGENT";

/// Output still buffered after exit is collected for at most this long
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest diagnostic carried into a task error
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Everything needed to launch one sub-agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
}

/// How a process ended, with its captured output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short explanation of a failed exit
    pub fn diagnostic(&self) -> String {
        let status = match self.code {
            Some(code) => format!("Sub-agent exited with code {}", code),
            None => "Sub-agent was terminated by a signal".to_string(),
        };
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if detail.is_empty() {
            status
        } else {
            format!("{}: {}", status, truncate_chars(detail, MAX_DIAGNOSTIC_CHARS))
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Ask the process to exit
    Terminate,
    /// Force it
    Kill,
}

/// A running sub-agent
#[async_trait]
pub trait AgentProcess: Send {
    /// Wait for exit. Must be safe to call again after being cancelled.
    async fn wait(&mut self) -> Result<ProcessExit>;

    fn signal(&mut self, signal: ProcessSignal) -> Result<()>;

    fn id(&self) -> Option<u32> {
        None
    }
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn AgentProcess>>;
}

/// Launches `<program> [args..] --prompt <prompt>` as a child process
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before `--prompt`
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Spawner for the configured command, or the running executable
    pub fn from_config(agent_command: Option<&str>) -> Result<Self> {
        match agent_command.map(str::trim).filter(|c| !c.is_empty()) {
            Some(command) => {
                let mut parts = command.split_whitespace();
                let program = parts
                    .next()
                    .ok_or_else(|| Error::Config("agent_command is empty".to_string()))?;
                Ok(Self::new(program).with_args(parts))
            }
            None => Ok(Self::new(std::env::current_exe()?)),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl ProcessSpawner for CommandSpawner {
    async fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn AgentProcess>> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--prompt")
            .arg(&request.prompt)
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .env(SUBAGENT_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so signals reach anything the agent started.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            Error::Execution(format!(
                "Failed to spawn {}: {}",
                self.program.display(),
                e
            ))
        })?;
        debug!("Spawned sub-agent pid={:?} in {}", child.id(), request.working_dir.display());

        let stdout = child.stdout.take().map(collect_output);
        let stderr = child.stderr.take().map(collect_output);
        Ok(Box::new(CommandProcess {
            child,
            stdout,
            stderr,
            exit: None,
        }))
    }
}

fn collect_output<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf).await {
            warn!("Failed reading sub-agent output: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

struct CommandProcess {
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    exit: Option<ProcessExit>,
}

impl CommandProcess {
    #[cfg(unix)]
    fn send(&mut self, signal: libc::c_int) -> Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        // SAFETY: kill(2) has no memory-safety preconditions; a negative
        // pid addresses the process group created at spawn.
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }
}

async fn drain(handle: &mut Option<JoinHandle<String>>) -> String {
    let Some(join) = handle.as_mut() else {
        return String::new();
    };
    let output = match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut *join).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            warn!("Output still open after exit, discarding");
            join.abort();
            String::new()
        }
    };
    *handle = None;
    output
}

#[async_trait]
impl AgentProcess for CommandProcess {
    async fn wait(&mut self) -> Result<ProcessExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }

        let status = self.child.wait().await?;
        let stdout = drain(&mut self.stdout).await;
        let stderr = drain(&mut self.stderr).await;

        let exit = ProcessExit {
            code: status.code(),
            stdout,
            stderr,
        };
        self.exit = Some(exit.clone());
        Ok(exit)
    }

    fn signal(&mut self, signal: ProcessSignal) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        match signal {
            #[cfg(unix)]
            ProcessSignal::Terminate => self.send(libc::SIGTERM),
            #[cfg(unix)]
            ProcessSignal::Kill => self.send(libc::SIGKILL),
            #[cfg(not(unix))]
            ProcessSignal::Terminate | ProcessSignal::Kill => Ok(self.child.start_kill()?),
        }
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(prompt: &str) -> SpawnRequest {
        SpawnRequest {
            prompt: prompt.to_string(),
            working_dir: std::env::temp_dir(),
            env: HashMap::from([("CC_TEST_VALUE".to_string(), "42".to_string())]),
        }
    }

    /// `sh -c <script> --prompt <prompt>` sees the prompt as `$1`
    fn shell(script: &str) -> CommandSpawner {
        CommandSpawner::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_captures_stdout_and_prompt() {
        let spawner = shell(r#"echo "got: $1 env=$CC_TEST_VALUE sub=$CC_SUBAGENT""#);
        let mut process = spawner.spawn(request("hello")).await.unwrap();

        let exit = process.wait().await.unwrap();
        assert!(exit.success());
        assert_eq!(exit.stdout.trim(), "got: hello env=42 sub=1");

        // Second wait returns the cached exit
        assert_eq!(process.wait().await.unwrap(), exit);
    }

    #[tokio::test]
    async fn test_failure_diagnostic_uses_stderr() {
        let spawner = shell("echo boom >&2; exit 3");
        let mut process = spawner.spawn(request("x")).await.unwrap();

        let exit = process.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.diagnostic(), "Sub-agent exited with code 3: boom");
    }

    #[tokio::test]
    async fn test_terminate_stops_process() {
        let spawner = shell("sleep 30");
        let mut process = spawner.spawn(request("x")).await.unwrap();

        process.signal(ProcessSignal::Terminate).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("process should exit after SIGTERM")
            .unwrap();
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_execution_error() {
        let spawner = CommandSpawner::new("/nonexistent/cc-agent-binary");
        let err = spawner.spawn(request("x")).await.err().unwrap();
        assert!(matches!(err, Error::Execution(_)));
    }

    #[test]
    fn test_from_config_splits_command() {
        let spawner = CommandSpawner::from_config(Some("cargo run --quiet --")).unwrap();
        assert_eq!(spawner.program(), &PathBuf::from("cargo"));
        assert_eq!(spawner.args, vec!["run", "--quiet", "--"]);
    }

    #[test]
    fn test_diagnostic_truncates() {
        let exit = ProcessExit {
            code: None,
            stdout: "x".repeat(MAX_DIAGNOSTIC_CHARS + 10),
            stderr: String::new(),
        };
        let diagnostic = exit.diagnostic();
        assert!(diagnostic.starts_with("Sub-agent was terminated by a signal: "));
        assert!(diagnostic.ends_with("..."));
    }
}
