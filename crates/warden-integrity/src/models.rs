//! # Integrity Data Models
//!
//! Ledger entries, per-component verification outcomes and the aggregated
//! sweep summary.
//!
//! ## Threat Model
//!
//! | Threat | Type that surfaces it |
//! |--------|-----------------------|
//! | Silent modification of a trusted component | `ValidationResult::Tampered` |
//! | Deletion of a trusted component | `ValidationResult::Missing` |
//! | Injection of an unregistered component | `ValidationResult::Unknown` |
//!
//! `ValidationResult` is exhaustive so callers must decide what to do with
//! every state; the ledger itself never auto-trusts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a component is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// A single file.
    File,
    /// A directory tree.
    Directory,
}

/// A registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityEntry {
    /// Ledger key.
    pub component_name: String,
    /// Path that was hashed at registration.
    pub path: PathBuf,
    /// Hex SHA-256 digest.
    pub hash_primary: String,
    /// Hex BLAKE3 digest (files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_secondary: Option<String>,
    /// File or directory.
    pub kind: ComponentKind,
    /// Whether the registering party vouched for the component.
    pub trusted: bool,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// Outcome of verifying one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    /// Digests match.
    Verified {
        /// `trusted` flag from registration.
        trusted: bool,
        /// When the component was registered.
        registered_at: DateTime<Utc>,
    },
    /// Never registered.
    Unknown,
    /// Registered, but the path no longer exists.
    Missing {
        /// Path that was checked.
        path: PathBuf,
    },
    /// Registered, but the content changed.
    Tampered {
        /// Digest recorded at registration.
        expected: String,
        /// Digest computed now.
        actual: String,
    },
}

impl ValidationResult {
    /// True only for `Verified`.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    /// Short status label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verified { .. } => "verified",
            Self::Unknown => "unknown",
            Self::Missing { .. } => "missing",
            Self::Tampered { .. } => "tampered",
        }
    }
}

/// What the caller should do after a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Recommendation {
    /// Everything verified.
    Allow,
    /// Something is unverified but nothing is known to be tampered.
    Warn,
    /// At least one component is tampered.
    Block,
}

/// Aggregated result of validating many components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Components whose digests matched.
    pub verified: usize,
    /// Components whose digests differ.
    pub tampered: usize,
    /// Components that were never registered.
    pub unknown: usize,
    /// Components whose path is gone.
    pub missing: usize,
    /// Overall recommendation.
    pub recommendation: Recommendation,
    /// Per-component results, in name order.
    pub results: Vec<(String, ValidationResult)>,
}

impl ValidationSummary {
    /// Tallies results and derives the recommendation.
    ///
    /// `Block` if anything is tampered, else `Warn` if anything is unknown or
    /// missing, else `Allow`.
    #[must_use]
    pub fn from_results(results: Vec<(String, ValidationResult)>) -> Self {
        let (mut verified, mut tampered, mut unknown, mut missing) = (0, 0, 0, 0);
        for (_, result) in &results {
            match result {
                ValidationResult::Verified { .. } => verified += 1,
                ValidationResult::Tampered { .. } => tampered += 1,
                ValidationResult::Unknown => unknown += 1,
                ValidationResult::Missing { .. } => missing += 1,
            }
        }

        let recommendation = if tampered > 0 {
            Recommendation::Block
        } else if unknown > 0 || missing > 0 {
            Recommendation::Warn
        } else {
            Recommendation::Allow
        };

        Self {
            verified,
            tampered,
            unknown,
            missing,
            recommendation,
            results,
        }
    }

    /// Total number of components checked.
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verified() -> ValidationResult {
        ValidationResult::Verified {
            trusted: true,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_recommendation_precedence() {
        let all_good = ValidationSummary::from_results(vec![("a".into(), verified())]);
        assert_eq!(all_good.recommendation, Recommendation::Allow);

        let unknown = ValidationSummary::from_results(vec![
            ("a".into(), verified()),
            ("b".into(), ValidationResult::Unknown),
        ]);
        assert_eq!(unknown.recommendation, Recommendation::Warn);
        assert_eq!(unknown.unknown, 1);

        let tampered = ValidationSummary::from_results(vec![
            ("a".into(), ValidationResult::Unknown),
            (
                "b".into(),
                ValidationResult::Tampered {
                    expected: "00".into(),
                    actual: "11".into(),
                },
            ),
        ]);
        assert_eq!(tampered.recommendation, Recommendation::Block);
    }

    #[test]
    fn test_empty_summary_allows() {
        let summary = ValidationSummary::from_results(Vec::new());
        assert_eq!(summary.recommendation, Recommendation::Allow);
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_result_serializes_with_status_tag() {
        let json = serde_json::to_value(ValidationResult::Unknown).unwrap();
        assert_eq!(json["status"], "unknown");
    }
}
