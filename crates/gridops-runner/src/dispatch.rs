//! Command dispatcher.
//!
//! One handler per [`Command`] variant. Every handler validates its input
//! before touching the host, then sequences file writes and executor calls.
//! Handler failures never escape as faults: errors and panics both become
//! error responses.

use std::any::Any;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use gridops_protocol::{Command, ControlAction, Response, parse_request};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::backup;
use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::executor::{Executor, Invocation};
use crate::restart::RestartPlan;
use crate::unit::{MountLayout, generate_mount_unit};
use crate::validate::{validate_remote_name, validate_slug};

/// Compose descriptor file name inside each app directory.
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Environment file name inside each app directory.
pub const ENV_FILE: &str = ".env";

/// What the listener does with a handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    /// Work to run after the response has been flushed.
    pub restart: Option<RestartPlan>,
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            response,
            restart: None,
        }
    }
}

pub struct Dispatcher {
    config: Arc<RunnerConfig>,
    executor: Arc<dyn Executor>,
}

impl Dispatcher {
    pub fn new(config: Arc<RunnerConfig>, executor: Arc<dyn Executor>) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    /// Parse a raw request body and handle it.
    pub async fn handle_request(&self, body: &[u8]) -> Reply {
        match parse_request(body) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                warn!(error = %e, "Rejected request");
                Response::error(e.to_string()).into()
            }
        }
    }

    /// Handle one command.
    pub async fn handle(&self, command: Command) -> Reply {
        let name = command.name();
        debug!(command = name, "Dispatching");

        match AssertUnwindSafe(self.dispatch(command)).catch_unwind().await {
            Ok(Ok(reply)) => {
                if reply.response.is_success() {
                    info!(command = name, "Command succeeded");
                } else {
                    warn!(
                        command = name,
                        message = reply.response.message.as_deref().unwrap_or_default(),
                        "Command failed"
                    );
                }
                reply
            }
            Ok(Err(e)) => {
                if e.is_rejection() {
                    warn!(command = name, error = %e, "Command rejected");
                    Response::error(e.to_string()).into()
                } else {
                    error!(command = name, error = ?e, "Command errored");
                    Response::error(public_message(&e)).into()
                }
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(command = name, panic = %detail, "Handler panicked");
                Response::error(format!("internal error: {detail}")).into()
            }
        }
    }

    async fn dispatch(&self, command: Command) -> RunnerResult<Reply> {
        match command {
            Command::InstallApp {
                app_slug,
                compose_content,
                env_content,
            } => self
                .install_app(&app_slug, &compose_content, &env_content)
                .await
                .map(Reply::from),
            Command::ControlApp { app_slug, action } => {
                self.control_app(&app_slug, action).await.map(Reply::from)
            }
            Command::BackupApp { app_slug } => self.backup_app(&app_slug).await.map(Reply::from),
            Command::ReloadProxy { caddyfile } => {
                self.reload_proxy(&caddyfile).await.map(Reply::from)
            }
            Command::SelfUpdate => self.self_update().await,
            Command::ConfigureRemoteStorage { config_content } => self
                .configure_remote_storage(&config_content)
                .await
                .map(Reply::from),
            Command::MountRemoteStorage { remote } => {
                self.mount_remote_storage(&remote).await.map(Reply::from)
            }
        }
    }

    async fn install_app(
        &self,
        app_slug: &str,
        compose_content: &str,
        env_content: &str,
    ) -> RunnerResult<Response> {
        let slug = validate_slug(app_slug)?;
        if compose_content.is_empty() {
            return Err(RunnerError::MissingField("compose_content"));
        }

        let app_dir = self.config.paths.app_dir(&slug);
        tokio::fs::create_dir_all(&app_dir)
            .await
            .map_err(|e| RunnerError::io("creating", &app_dir, e))?;

        write_file(&app_dir.join(COMPOSE_FILE), compose_content, 0o644).await?;
        if !env_content.is_empty() {
            // may hold secrets
            write_file(&app_dir.join(ENV_FILE), env_content, 0o600).await?;
        }

        info!(app = %slug, "Installing app");
        let invocation =
            Invocation::new([self.config.binaries.docker.as_str(), "compose", "up", "-d"])
                .current_dir(&app_dir);
        Ok(self.executor.run(&invocation).await.into())
    }

    async fn control_app(&self, app_slug: &str, action: ControlAction) -> RunnerResult<Response> {
        let slug = validate_slug(app_slug)?;
        let app_dir = self.config.paths.app_dir(&slug);
        if !is_dir(&app_dir).await {
            return Err(RunnerError::AppNotFound(slug.to_string()));
        }

        info!(app = %slug, %action, "Controlling app");
        let invocation = Invocation::new([
            self.config.binaries.docker.as_str(),
            "compose",
            action.as_str(),
        ])
        .current_dir(&app_dir);
        Ok(self.executor.run(&invocation).await.into())
    }

    async fn backup_app(&self, app_slug: &str) -> RunnerResult<Response> {
        let slug = validate_slug(app_slug)?;
        let (archive, result) =
            backup::backup_app(&self.config, self.executor.as_ref(), &slug).await?;

        let succeeded = result.succeeded;
        let mut response = Response::from(result);
        if succeeded {
            response.message = Some(format!("Backup written to {}", archive.display()));
        }
        Ok(response)
    }

    async fn reload_proxy(&self, caddyfile: &str) -> RunnerResult<Response> {
        if caddyfile.is_empty() {
            return Err(RunnerError::MissingField("caddyfile"));
        }

        let path = &self.config.paths.caddyfile;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RunnerError::io("creating", parent, e))?;
        }
        write_file(path, caddyfile, 0o644).await?;

        let path = path.display().to_string();
        let invocation = Invocation::new([
            self.config.binaries.caddy.as_str(),
            "reload",
            "--config",
            path.as_str(),
            "--adapter",
            "caddyfile",
        ]);
        Ok(self.executor.run(&invocation).await.into())
    }

    async fn self_update(&self) -> RunnerResult<Reply> {
        let paths = &self.config.paths;
        tokio::fs::create_dir_all(&paths.backup_dir)
            .await
            .map_err(|e| RunnerError::io("creating", &paths.backup_dir, e))?;

        let archive = self
            .executor
            .run(&backup::system_backup_invocation(&self.config))
            .await;
        if !archive.succeeded {
            // the update goes ahead without a restore point
            warn!(
                error = archive.error_message.as_deref().unwrap_or_default(),
                "Pre-update backup failed"
            );
        }

        let pull = Invocation::new([self.config.binaries.git.as_str(), "pull"])
            .current_dir(&paths.install_dir);
        let pull = self.executor.run(&pull).await;
        if !pull.succeeded {
            return Ok(Response::from(pull).into());
        }

        let plan = RestartPlan {
            units: self.config.self_update.restart_units.clone(),
            delay: Duration::from_secs(self.config.self_update.restart_delay_secs),
        };
        Ok(Reply {
            response: Response::success_with("Update started. System restarting...")
                .with_output(pull.stdout, pull.stderr),
            restart: Some(plan),
        })
    }

    async fn configure_remote_storage(&self, config_content: &str) -> RunnerResult<Response> {
        if config_content.is_empty() {
            return Err(RunnerError::MissingField("config_content"));
        }

        let dir = &self.config.paths.rclone_config_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RunnerError::io("creating", dir, e))?;
        // credentials
        write_file(&self.config.paths.rclone_config_file(), config_content, 0o600).await?;

        Ok(Response::success_with("Rclone config saved"))
    }

    async fn mount_remote_storage(&self, remote: &str) -> RunnerResult<Response> {
        let remote = validate_remote_name(remote)?;
        let unit = generate_mount_unit(&remote, &MountLayout::from_config(&self.config));

        tokio::fs::create_dir_all(&unit.mount_point)
            .await
            .map_err(|e| RunnerError::io("creating", &unit.mount_point, e))?;

        let unit_dir = &self.config.paths.unit_dir;
        tokio::fs::create_dir_all(unit_dir)
            .await
            .map_err(|e| RunnerError::io("creating", unit_dir, e))?;
        write_file(&unit.path_in(unit_dir), &unit.content, 0o644).await?;
        info!(remote = %remote, unit = %unit.name, "Mount unit written");

        let systemctl = self.config.binaries.systemctl.as_str();
        let reload = self
            .executor
            .run(&Invocation::new([systemctl, "daemon-reload"]))
            .await;
        if !reload.succeeded {
            return Ok(reload.into());
        }

        let enable = self
            .executor
            .run(&Invocation::new([
                systemctl,
                "enable",
                "--now",
                unit.name.as_str(),
            ]))
            .await;
        if !enable.succeeded {
            return Ok(enable.into());
        }

        Ok(
            Response::success_with(format!(
                "Mounted {remote} at {}",
                unit.mount_point.display()
            ))
            .with_output(enable.stdout, enable.stderr),
        )
    }
}

/// Truncate-and-write `path`, leaving it with exactly `mode`.
async fn write_file(path: &Path, contents: &str, mode: u32) -> RunnerResult<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .await
        .map_err(|e| RunnerError::io("opening", path, e))?;
    // an existing file keeps its old bits otherwise
    file.set_permissions(Permissions::from_mode(mode))
        .await
        .map_err(|e| RunnerError::io("setting permissions on", path, e))?;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| RunnerError::io("writing", path, e))?;
    file.flush()
        .await
        .map_err(|e| RunnerError::io("writing", path, e))?;
    debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}

pub(crate) async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Message returned to the caller for host-side failures. Full detail stays
/// in the log.
fn public_message(error: &RunnerError) -> String {
    match error {
        RunnerError::Io { action, path, .. } => {
            format!("{action} {} failed", path.display())
        }
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
