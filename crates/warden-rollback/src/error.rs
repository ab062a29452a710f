//! Error types for the rollback crate.
//!
//! A failed rollback is not an error here: it comes back as
//! [`RollbackOutcome::Failed`](crate::RollbackOutcome) so the recording path
//! keeps working. These variants cover persistence and version control
//! plumbing.

use thiserror::Error;

/// Result type alias for rollback operations.
pub type Result<T> = std::result::Result<T, RollbackError>;

/// Errors from the rollback controller.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// State store failure.
    #[error("rollback store error: {0}")]
    Database(#[from] sled::Error),

    /// Persisted state could not be (de)serialized.
    #[error("rollback state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Audit log or kill switch failure.
    #[error(transparent)]
    Integrity(#[from] warden_integrity::IntegrityError),

    /// A version control command failed.
    #[error("{command} failed: {message}")]
    Vcs {
        /// Command line that failed.
        command: String,
        /// stderr or spawn error.
        message: String,
    },

    /// No known-good checkpoint has been recorded yet.
    #[error("no known-good checkpoint recorded")]
    NoCheckpoint,

    /// A blocking version control task panicked or was cancelled.
    #[error("version control task failed: {0}")]
    Task(String),

    /// Controller configuration is out of range.
    #[error("invalid rollback configuration: {0}")]
    Config(String),
}
