//! Synchronous client for the runner socket, used by the control plane.
//!
//! One connection per command: write the request, half-close, read the
//! response until the runner closes its side.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gridops_protocol::{Command, ControlAction, Response};
use thiserror::Error;
use tracing::debug;

use crate::config::{LimitsConfig, RunnerConfig};

/// Most child processes one request runs back to back (`self_update`:
/// archive then pull; `mount_rclone`: daemon-reload then enable).
pub const MAX_COMMANDS_PER_REQUEST: u32 = 2;

/// Slack on top of the runner's own bounds.
const READ_MARGIN: Duration = Duration::from_secs(60);

/// Read timeout matching the default [`LimitsConfig`].
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2 * 900 + 30 + 60);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest the runner can take to answer one request under `limits`.
pub fn read_timeout_for(limits: &LimitsConfig) -> Duration {
    limits.command_timeout() * MAX_COMMANDS_PER_REQUEST + limits.request_timeout() + READ_MARGIN
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing is listening on the socket.
    #[error("Ops runner not available")]
    Unavailable(#[source] std::io::Error),

    #[error("talking to ops runner at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decoding runner response: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct OpsClient {
    socket: PathBuf,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl OpsClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Client for the socket and limits of a runner config.
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(&config.socket.path).with_read_timeout(read_timeout_for(&config.limits))
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Send one command and wait for its response.
    pub fn send(&self, command: &Command) -> Result<Response, ClientError> {
        let body = command.to_json().map_err(ClientError::Encode)?;
        let raw = self.exchange(body.as_bytes())?;
        serde_json::from_slice(&raw).map_err(ClientError::Decode)
    }

    /// Send raw bytes and return the raw response body.
    pub fn exchange(&self, body: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut stream = UnixStream::connect(&self.socket).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                ClientError::Unavailable(e)
            }
            _ => self.io_error(e),
        })?;
        debug!(socket = %self.socket.display(), bytes = body.len(), "Sending request");

        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|e| self.io_error(e))?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(|e| self.io_error(e))?;

        stream.write_all(body).map_err(|e| self.io_error(e))?;
        stream.flush().map_err(|e| self.io_error(e))?;
        stream
            .shutdown(Shutdown::Write)
            .map_err(|e| self.io_error(e))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .map_err(|e| self.io_error(e))?;
        Ok(response)
    }

    fn io_error(&self, source: std::io::Error) -> ClientError {
        ClientError::Io {
            path: self.socket.clone(),
            source,
        }
    }

    pub fn install_app(
        &self,
        app_slug: &str,
        compose_content: &str,
        env_content: &str,
    ) -> Result<Response, ClientError> {
        self.send(&Command::InstallApp {
            app_slug: app_slug.to_string(),
            compose_content: compose_content.to_string(),
            env_content: env_content.to_string(),
        })
    }

    pub fn control_app(&self, app_slug: &str, action: ControlAction) -> Result<Response, ClientError> {
        self.send(&Command::ControlApp {
            app_slug: app_slug.to_string(),
            action,
        })
    }

    pub fn backup_app(&self, app_slug: &str) -> Result<Response, ClientError> {
        self.send(&Command::BackupApp {
            app_slug: app_slug.to_string(),
        })
    }

    pub fn reload_proxy(&self, caddyfile: &str) -> Result<Response, ClientError> {
        self.send(&Command::ReloadProxy {
            caddyfile: caddyfile.to_string(),
        })
    }

    pub fn self_update(&self) -> Result<Response, ClientError> {
        self.send(&Command::SelfUpdate)
    }

    pub fn save_rclone_config(&self, config_content: &str) -> Result<Response, ClientError> {
        self.send(&Command::ConfigureRemoteStorage {
            config_content: config_content.to_string(),
        })
    }

    pub fn mount_rclone(&self, remote: &str) -> Result<Response, ClientError> {
        self.send(&Command::MountRemoteStorage {
            remote: remote.to_string(),
        })
    }
}
