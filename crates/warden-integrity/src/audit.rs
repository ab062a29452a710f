//! # Durable Audit Log
//!
//! Append-only, timestamped record of every security-relevant event:
//! integrity failures, immutable-path violations, seal changes, kill switch
//! transitions and rollbacks.
//!
//! ## Storage
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `audit` | monotonic id (u64, big-endian) | JSON [`AuditRecord`] |
//!
//! Big-endian ids keep sled's lexicographic key order equal to insertion
//! order, so iteration is chronological without sorting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::error::{IntegrityError, Result};
use crate::guardian::WriteTier;
use crate::storage::AUDIT_TREE;

/// An attempted write against a protected path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// Principal that attempted the write.
    pub principal: String,
    /// Operation name.
    pub operation: String,
    /// Normalized target path.
    pub path: String,
    /// Tier the path fell into.
    pub tier: WriteTier,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Something worth remembering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A component failed verification with a digest mismatch.
    IntegrityTampered {
        /// Component name.
        component: String,
        /// Registered digest.
        expected: String,
        /// Observed digest.
        actual: String,
    },
    /// A registered component disappeared.
    IntegrityMissing {
        /// Component name.
        component: String,
        /// Path that was checked.
        path: PathBuf,
    },
    /// A write against an immutable path was refused.
    Violation(ViolationRecord),
    /// The baseline was sealed.
    SealCreated {
        /// Combined baseline digest.
        digest: String,
        /// Number of baseline components.
        components: usize,
    },
    /// The seal no longer matches the baseline.
    SealBroken {
        /// Components that failed verification.
        failures: Vec<String>,
    },
    /// The kill switch was engaged.
    KillSwitchEngaged {
        /// Operator-supplied reason.
        reason: String,
        /// Marker written.
        marker: PathBuf,
    },
    /// The kill switch markers were removed.
    KillSwitchReleased {
        /// Number of markers removed.
        markers_removed: usize,
    },
    /// An automatic rollback completed.
    RollbackTriggered {
        /// Component whose failures caused it.
        component: String,
        /// Checkpoint checked out.
        checkpoint: String,
        /// Stash reference, if local changes were saved.
        stash: Option<String>,
    },
    /// An automatic rollback could not complete.
    RollbackFailed {
        /// Component whose failures caused it.
        component: String,
        /// Why it failed.
        reason: String,
    },
    /// An operator left recovery mode.
    RecoveryExited,
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic id.
    pub id: u64,
    /// Append time.
    pub at: DateTime<Utc>,
    /// The event.
    pub event: AuditEvent,
}

/// Append-only audit log backed by a sled tree.
#[derive(Clone)]
pub struct AuditLog {
    db: sled::Db,
    tree: sled::Tree,
}

impl AuditLog {
    /// Opens the `audit` tree of `db`.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if the tree cannot be opened.
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            tree: db.open_tree(AUDIT_TREE)?,
        })
    }

    /// Creates an in-memory log for testing.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if the temporary database fails.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::open(&db)
    }

    /// Appends an event.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` or `IntegrityError::Serialization`.
    pub fn append(&self, event: AuditEvent) -> Result<AuditRecord> {
        let record = AuditRecord {
            id: self.db.generate_id()?,
            at: Utc::now(),
            event,
        };
        self.tree
            .insert(record.id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        debug!(id = record.id, "audit record appended");
        Ok(record)
    }

    /// All records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read or decoded.
    pub fn records(&self) -> Result<Vec<AuditRecord>> {
        self.tree
            .iter()
            .map(|item| {
                let (_, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    /// The newest `limit` records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read or decoded.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut records = self
            .tree
            .iter()
            .rev()
            .take(limit)
            .map(|item| {
                let (_, value) = item?;
                serde_json::from_slice(&value).map_err(IntegrityError::from)
            })
            .collect::<Result<Vec<AuditRecord>>>()?;
        records.reverse();
        Ok(records)
    }

    /// Every recorded violation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read or decoded.
    pub fn violations(&self) -> Result<Vec<ViolationRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|record| match record.event {
                AuditEvent::Violation(violation) => Some(violation),
                _ => None,
            })
            .collect())
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flushes pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if the flush fails.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.tree.flush()?)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("records", &self.len()).finish()
    }
}
