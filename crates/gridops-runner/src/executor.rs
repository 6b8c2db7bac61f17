//! Process executor.
//!
//! Runs an external program from an explicit argument vector. There is no
//! shell anywhere in this path, so no caller-supplied string is ever parsed
//! for metacharacters. stdout and stderr are captured separately and in
//! full, and every child is bounded by a timeout after which it is killed.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gridops_protocol::{Response, Status};
use tokio::process::Command;
use tracing::{info, warn};

/// A program invocation: argv, working directory, extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the runner's own environment.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// Why an invocation did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The program ran and exited unsuccessfully (`None` when killed by a signal).
    NonZeroExit(Option<i32>),
    /// The program could not be started.
    SpawnFailed,
    /// The program outlived the configured timeout and was killed.
    TimedOut,
    /// Waiting on the child failed.
    Wait,
}

/// Outcome of one invocation. Built only through [`ExecutionResult::success`]
/// and [`ExecutionResult::failure`], so it is never half-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub error_message: Option<String>,
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error_message: None,
            failure: None,
        }
    }

    pub fn failure(
        kind: FailureKind,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            succeeded: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error_message: Some(message.into()),
            failure: Some(kind),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.failure == Some(FailureKind::TimedOut)
    }
}

impl From<ExecutionResult> for Response {
    fn from(result: ExecutionResult) -> Self {
        Response {
            status: if result.succeeded {
                Status::Success
            } else {
                Status::Error
            },
            message: result.error_message,
            stdout: Some(result.stdout),
            stderr: Some(result.stderr),
        }
    }
}

/// Seam between command handlers and the host.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> ExecutionResult;
}

/// Executor backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, invocation: &Invocation) -> ExecutionResult {
        let Some((program, args)) = invocation.argv.split_first() else {
            return ExecutionResult::failure(FailureKind::SpawnFailed, "", "", "empty command");
        };

        info!(command = %invocation, cwd = ?invocation.cwd, "Running command");

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %invocation, error = %e, "Failed to start command");
                return ExecutionResult::failure(
                    FailureKind::SpawnFailed,
                    "",
                    "",
                    format!("failed to execute {program}: {e}"),
                );
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(command = %invocation, error = %e, "Failed waiting on command");
                return ExecutionResult::failure(
                    FailureKind::Wait,
                    "",
                    "",
                    format!("failed waiting on {program}: {e}"),
                );
            }
            Err(_) => {
                warn!(command = %invocation, timeout = ?self.timeout, "Command timed out, killed");
                return ExecutionResult::failure(
                    FailureKind::TimedOut,
                    "",
                    "",
                    format!(
                        "{program} timed out after {}s",
                        self.timeout.as_secs_f32()
                    ),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            ExecutionResult::success(stdout, stderr)
        } else {
            let code = output.status.code();
            warn!(command = %invocation, ?code, stderr = %stderr.trim(), "Command failed");
            let message = match code {
                Some(code) => format!("{invocation} failed (exit {code})"),
                None => format!("{invocation} terminated by signal"),
            };
            ExecutionResult::failure(FailureKind::NonZeroExit(code), stdout, stderr, message)
        }
    }
}
