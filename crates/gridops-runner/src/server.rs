//! Unix socket listener.
//!
//! Connections are handled strictly one at a time: the next `accept` only
//! happens after the current response has been written and the connection
//! closed. Commands therefore execute in arrival order and no two child
//! processes started by this daemon ever overlap.
//!
//! Access control is the socket file itself (mode and group ownership set at
//! bind time). Anything that can open the socket can issue every command;
//! there is no per-request authentication.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gridops_protocol::Response;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::config::{LimitsConfig, RunnerConfig, SocketConfig};
use crate::dispatch::Dispatcher;
use crate::executor::Executor;
use crate::restart::RestartPlan;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("binding {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("setting permissions on {}: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to read one request off a connection.
#[derive(Debug, Error)]
enum RequestError {
    #[error("request not received within {0:?}")]
    TimedOut(Duration),

    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("reading request: {0}")]
    Io(#[from] std::io::Error),
}

/// Why [`Server::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The shutdown signal fired.
    Shutdown,
    /// A self-update finished; the process should exit so its supervisor
    /// starts the new release.
    Restart,
}

pub struct Server {
    listener: UnixListener,
    path: PathBuf,
    dispatcher: Dispatcher,
}

impl Server {
    /// Bind the socket and apply its access control.
    pub fn bind(config: Arc<RunnerConfig>, executor: Arc<dyn Executor>) -> Result<Self, ServerError> {
        let listener = bind_socket(&config.socket)?;
        Ok(Self {
            listener,
            path: config.socket.path.clone(),
            dispatcher: Dispatcher::new(config, executor),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Accept and handle connections until `shutdown` resolves or a restart
    /// is requested. Removes the socket file on return.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> ServeExit {
        tokio::pin!(shutdown);
        info!(socket = %self.path.display(), "Listening");

        let exit = loop {
            let stream = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break ServeExit::Shutdown;
                }
            };

            if let Some(plan) = self.handle_connection(stream).await {
                let config = self.dispatcher.config();
                plan.execute(&config.binaries.systemctl, self.dispatcher.executor())
                    .await;
                break ServeExit::Restart;
            }
        };

        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, "Could not remove socket file");
        }
        exit
    }

    /// Read, dispatch, respond, close. Returns a restart plan if the handled
    /// command asked for one.
    async fn handle_connection(&self, mut stream: UnixStream) -> Option<RestartPlan> {
        if let Ok(cred) = stream.peer_cred() {
            debug!(uid = cred.uid(), gid = cred.gid(), pid = ?cred.pid(), "Connection accepted");
        }

        let limits = &self.dispatcher.config().limits;
        let reply = match read_request(&mut stream, limits).await {
            Ok(body) => self.dispatcher.handle_request(&body).await,
            Err(e) => {
                warn!(error = %e, "Failed to read request");
                Response::error(e.to_string()).into()
            }
        };

        if let Err(e) = write_response(&mut stream, &reply.response).await {
            warn!(error = %e, "Failed to write response, dropping connection");
        }
        reply.restart
    }
}

/// Remove any stale socket, bind, then restrict it to owner and group.
fn bind_socket(socket: &SocketConfig) -> Result<UnixListener, ServerError> {
    let path = &socket.path;
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(socket = %path.display(), error = %e, "Could not remove stale socket"),
    }
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(dir = %parent.display(), error = %e, "Could not create socket directory");
    }

    let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
        path: path.clone(),
        source,
    })?;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(socket.mode)).map_err(
        |source| ServerError::Permissions {
            path: path.clone(),
            source,
        },
    )?;

    if let Some(group) = &socket.group {
        match lookup_gid(group) {
            Some(gid) => {
                if let Err(e) = std::os::unix::fs::chown(path, None, Some(gid)) {
                    error!(group = %group, error = %e, "Failed to set socket group");
                }
            }
            None => error!(group = %group, "Socket group not found, leaving default ownership"),
        }
    }

    Ok(listener)
}

/// Resolve a group name through NSS.
fn lookup_gid(group: &str) -> Option<u32> {
    let output = std::process::Command::new("getent")
        .args(["group", group])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    // name:password:gid:members
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .split(':')
        .nth(2)?
        .parse()
        .ok()
}

/// Read until the peer half-closes, bounded in time and size.
async fn read_request(stream: &mut UnixStream, limits: &LimitsConfig) -> Result<Vec<u8>, RequestError> {
    let max = limits.max_request_bytes;
    let read = async {
        let mut body = Vec::new();
        let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
        (&mut *stream).take(limit).read_to_end(&mut body).await?;
        Ok::<_, RequestError>(body)
    };

    let body = tokio::time::timeout(limits.request_timeout(), read)
        .await
        .map_err(|_| RequestError::TimedOut(limits.request_timeout()))??;
    if body.len() > max {
        return Err(RequestError::TooLarge(max));
    }
    Ok(body)
}

async fn write_response(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    stream.write_all(response.to_json().as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_group_resolves() {
        assert_eq!(lookup_gid("root"), Some(0));
    }

    #[test]
    fn unknown_group_is_none() {
        assert_eq!(lookup_gid("gridops-no-such-group-123"), None);
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_and_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.sock");
        std::fs::write(&path, b"stale").unwrap();

        let socket = SocketConfig {
            path: path.clone(),
            group: None,
            mode: 0o660,
        };
        let _listener = bind_socket(&socket).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
    }

    #[tokio::test]
    async fn uncreatable_socket_dir_fails_bind() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let socket = SocketConfig {
            path: blocker.join("runner.sock"),
            group: None,
            mode: 0o660,
        };
        let err = bind_socket(&socket).unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
