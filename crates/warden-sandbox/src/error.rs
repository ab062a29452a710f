//! Error types for the sandbox crate.
//!
//! Command failures (non-zero exit, timeout) are not errors; they come back
//! as [`ExecutionResult`](crate::ExecutionResult) data. These variants mean
//! the command could not be run at all.

use thiserror::Error;

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that prevent an execution from starting.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Isolation is not available and degraded mode is not allowed.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    /// The process could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed.
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request itself is unusable (empty command, missing cwd).
    #[error("invalid execution request: {0}")]
    InvalidRequest(String),

    /// Router configuration is out of range.
    #[error("invalid sandbox configuration: {0}")]
    Config(String),
}
