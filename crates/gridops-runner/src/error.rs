//! Runner error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::validate::ValidationError;

/// Result type for command handlers.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors raised while handling a command. Each becomes an error response;
/// process failures are not errors here, they travel as
/// [`ExecutionResult`](crate::executor::ExecutionResult).
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Rejected input. Raised before anything touches the host.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A required field was present but empty.
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// The application directory does not exist.
    #[error("App not found: {0}")]
    AppNotFound(String),

    /// Filesystem failure, with the path it happened on.
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether this error was raised before any side effect.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::MissingField(_) | Self::AppNotFound(_)
        )
    }
}
