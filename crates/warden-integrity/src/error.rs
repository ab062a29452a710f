//! Error types for the integrity crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for integrity operations.
pub type Result<T> = std::result::Result<T, IntegrityError>;

/// Errors raised by the ledger, guardian and audit log.
///
/// Verification *outcomes* (tampered, missing, unknown) are not errors; they
/// are [`ValidationResult`](crate::ValidationResult) values. These variants
/// cover the cases where no outcome could be computed at all.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Embedded database failure.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure while hashing or writing a marker.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Path given for registration does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// A baseline path is missing, so the baseline cannot be sealed.
    #[error("Baseline path missing: {0}")]
    BaselineMissing(PathBuf),

    /// An approval-tier pattern failed to compile.
    #[error("Invalid approval pattern: {0}")]
    Pattern(#[from] warden_auth::AuthError),

    /// Guardian or ledger configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntegrityError {
    /// Wraps an I/O error with the path it occurred at.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
