//! Error types for Warden Core.
//!
//! Per-request outcomes are [`Decision`](warden_auth::Decision)s. These
//! errors cover startup and store failures.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for warden operations.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Configuration could not be read or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML for the schema.
    #[error("Configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Authorization error passthrough.
    #[error("Auth error: {0}")]
    Auth(#[from] warden_auth::AuthError),

    /// Integrity error passthrough.
    #[error("Integrity error: {0}")]
    Integrity(#[from] warden_integrity::IntegrityError),

    /// Sandbox error passthrough.
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] warden_sandbox::SandboxError),

    /// Rollback error passthrough.
    #[error("Rollback error: {0}")]
    Rollback(#[from] warden_rollback::RollbackError),
}

/// Result type alias for warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
