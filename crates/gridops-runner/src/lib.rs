//! GridOps ops runner.
//!
//! A root-privileged daemon that performs host operations for the
//! unprivileged control plane: installing and controlling compose apps,
//! writing and reloading the reverse-proxy configuration, backups,
//! self-update and remote-storage mounts. Requests arrive as JSON over a
//! local Unix socket (see [`gridops_protocol`]) and are executed one at a
//! time.
//!
//! The trust boundary is the socket's file permissions. Every value taken
//! from a request is validated before it reaches a path or a process, and
//! processes are always started from an argument vector, never a shell.
//!
//! [`proxy`] is the pure Caddyfile compiler the control plane uses to
//! produce the text it sends with `reload_proxy`.

pub mod backup;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod logging;
pub mod proxy;
pub mod restart;
pub mod server;
pub mod unit;
pub mod validate;

pub use client::{ClientError, OpsClient};
pub use config::RunnerConfig;
pub use dispatch::{Dispatcher, Reply};
pub use error::{RunnerError, RunnerResult};
pub use executor::{ExecutionResult, Executor, FailureKind, Invocation, ProcessExecutor};
pub use server::{ServeExit, Server, ServerError};
