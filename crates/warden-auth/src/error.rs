//! Error types for the authorization crate.
//!
//! Only setup and store failures surface as [`AuthError`]. Per-request
//! failures never do: the pipeline folds them into a
//! [`Decision`](crate::Decision).

use thiserror::Error;

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised while configuring or persisting authorization state.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Master secret is missing or too short.
    #[error("invalid master secret: {0}")]
    InvalidSecret(String),

    /// A path pattern could not be compiled.
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern source.
        pattern: String,
        /// Why compilation failed.
        reason: String,
    },

    /// A role definition failed schema validation.
    #[error("invalid role '{role}': {reason}")]
    InvalidRole {
        /// Role name (may be empty when the name itself is the problem).
        role: String,
        /// Validation failure.
        reason: String,
    },

    /// Role is not present in the registry.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Principal is not registered.
    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    /// Credential service configuration is out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cipher or key-derivation failure while issuing a token.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Token payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Revocation store failure.
    #[error("revocation store error: {0}")]
    Store(#[from] sled::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_display() {
        let err = AuthError::InvalidPattern {
            pattern: "[".to_string(),
            reason: "unclosed class".to_string(),
        };
        assert!(err.to_string().contains("'['"));
        assert!(err.to_string().contains("unclosed class"));
    }

    #[test]
    fn test_unknown_role_display() {
        let err = AuthError::UnknownRole("ghost".to_string());
        assert_eq!(err.to_string(), "unknown role: ghost");
    }
}
