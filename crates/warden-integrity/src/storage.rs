//! # Persistent Storage Layer
//!
//! One sled database per process, one tree per record type.
//!
//! ## Storage Structure
//!
//! | Tree | Key | Value | Owner |
//! |------|-----|-------|-------|
//! | `revocations` | token digest | revocation time | credential service |
//! | `integrity` | component name | JSON `IntegrityEntry` | integrity ledger |
//! | `baseline` | component name | JSON `IntegrityEntry` | safety guardian |
//! | `seal` | `"current"` | JSON `SealRecord` | safety guardian |
//! | `audit` | u64 id, big-endian | JSON `AuditRecord` | audit log |
//! | `rollback` | `"state"` | JSON rollback state | rollback controller |
//!
//! ## Security Notes
//!
//! - The database directory should only be writable by the warden process
//! - The baseline and seal trees are what an attacker would target to hide
//!   tampering; the seal digest covers the baseline entries so edits to
//!   either are detected by `verify_seal`
//!
//! ## References
//!
//! - Sled documentation: <https://sled.rs/>

use std::path::Path;

use crate::error::Result;

/// Revoked token digests.
pub const REVOCATION_TREE: &str = "revocations";
/// General integrity ledger.
pub const INTEGRITY_TREE: &str = "integrity";
/// Safety guardian baseline ledger.
pub const BASELINE_TREE: &str = "baseline";
/// Baseline seal record.
pub const SEAL_TREE: &str = "seal";
/// Audit log.
pub const AUDIT_TREE: &str = "audit";
/// Rollback controller state.
pub const ROLLBACK_TREE: &str = "rollback";

/// Handle to the process-wide database.
///
/// Cloning is cheap; all clones share the same database.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    /// Opens or creates a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if the path is unusable or the
    /// database is corrupt.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Creates an in-memory database that is discarded on drop.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if sled cannot start.
    pub fn temporary() -> Result<Self> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    /// Opens a named tree.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` on failure.
    pub fn tree(&self, name: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// The underlying database.
    #[must_use]
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Flushes all pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if the flush fails.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("trees", &self.db.tree_names().len())
            .finish()
    }
}
