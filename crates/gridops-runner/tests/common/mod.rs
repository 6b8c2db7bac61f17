//! Test utilities and common setup.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gridops_runner::config::RunnerConfig;
use gridops_runner::executor::{ExecutionResult, Executor, FailureKind, Invocation};
use gridops_runner::Dispatcher;
use tempfile::TempDir;

type Responder = Box<dyn Fn(&Invocation) -> ExecutionResult + Send + Sync>;

/// Executor that records every invocation instead of running it.
pub struct RecordingExecutor {
    calls: Mutex<Vec<Invocation>>,
    responder: Responder,
}

impl RecordingExecutor {
    /// Every invocation succeeds with `ok` on stdout.
    pub fn succeeding() -> Self {
        Self::with(|_| ExecutionResult::success("ok", ""))
    }

    pub fn with(responder: impl Fn(&Invocation) -> ExecutionResult + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// Invocations whose argv contains `arg` exit 1; everything else succeeds.
    pub fn failing_on(arg: &'static str) -> Self {
        Self::with(move |inv| {
            if inv.argv.iter().any(|a| a == arg) {
                ExecutionResult::failure(
                    FailureKind::NonZeroExit(Some(1)),
                    "",
                    format!("{arg} failed"),
                    format!("{inv} failed (exit 1)"),
                )
            } else {
                ExecutionResult::success("ok", "")
            }
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|inv| inv.argv).collect()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run(&self, invocation: &Invocation) -> ExecutionResult {
        self.calls.lock().unwrap().push(invocation.clone());
        (self.responder)(invocation)
    }
}

/// Config with every writable path inside `root`.
pub fn test_config(root: &Path) -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.socket.path = root.join("ops").join("runner.sock");
    config.socket.group = None;
    config.paths.apps_dir = root.join("apps");
    config.paths.caddyfile = root.join("caddy").join("Caddyfile");
    config.paths.rclone_config_dir = root.join("rclone");
    config.paths.rclone_mount_dir = root.join("rclone_mounts");
    config.paths.unit_dir = root.join("systemd");
    config.paths.backup_dir = root.join("backups");
    config.paths.install_dir = root.to_path_buf();
    config.paths.log_dir = root.join("log");
    config.logging.file = None;
    config.self_update.restart_delay_secs = 0;
    config
}

/// A dispatcher over a fresh temp tree plus the executor it records into.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Arc<RunnerConfig>,
    pub executor: Arc<RecordingExecutor>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_executor(RecordingExecutor::succeeding())
    }

    pub fn with_executor(executor: RecordingExecutor) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(dir.path()));
        Self {
            dir,
            config,
            executor: Arc::new(executor),
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.config.clone(), self.executor.clone())
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
