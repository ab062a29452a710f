//! # Integrity Ledger
//!
//! Content digests for registered components and the verification logic
//! that classifies their current state.
//!
//! ## Threat Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Trojaned file | SHA-256 + BLAKE3 mismatch → `Tampered` |
//! | Trojaned file inside a trusted tree | Sorted whole-tree digest → `Tampered` |
//! | Deleted safeguard | Path check → `Missing` |
//! | Unvetted component | No entry → `Unknown` (never auto-trusted) |
//!
//! ## Concurrency
//!
//! Entries are kept in an immutable `Arc<BTreeMap>` snapshot behind a
//! read-write lock. Readers clone the `Arc` and drop the lock immediately,
//! so a long sweep reads a consistent view while registrations swap in a
//! new map. Writers go through sled first, then publish.
//!
//! ```text
//!  register ──▶ sled insert ──▶ clone map + insert ──▶ swap Arc
//!  validate_all ──▶ clone Arc ──▶ hash every entry (no lock held)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::error::{IntegrityError, Result};
use crate::hashing::{hash_directory, hash_file, DEFAULT_SKIP_DIRS};
use crate::models::{ComponentKind, IntegrityEntry, ValidationResult, ValidationSummary};

/// Configuration for [`IntegrityLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Directory names skipped when hashing trees.
    pub skip_dirs: Vec<String>,
}

impl LedgerConfig {
    /// Defaults: skip version-control and build output directories.
    #[must_use]
    pub fn new() -> Self {
        Self {
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Replaces the skip list.
    #[must_use]
    pub fn with_skip_dirs(mut self, skip_dirs: Vec<String>) -> Self {
        self.skip_dirs = skip_dirs;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new()
    }
}

type Snapshot = Arc<BTreeMap<String, IntegrityEntry>>;

/// Registered component digests with sled persistence.
pub struct IntegrityLedger {
    tree: sled::Tree,
    entries: RwLock<Snapshot>,
    config: LedgerConfig,
    audit: Option<AuditLog>,
}

impl IntegrityLedger {
    /// Opens a ledger over `tree`, loading all stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read or an entry is corrupt.
    pub fn open(tree: sled::Tree, config: LedgerConfig) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for item in tree.iter() {
            let (_, value) = item?;
            let entry: IntegrityEntry = serde_json::from_slice(&value)?;
            entries.insert(entry.component_name.clone(), entry);
        }
        debug!(entries = entries.len(), "integrity ledger loaded");

        Ok(Self {
            tree,
            entries: RwLock::new(Arc::new(entries)),
            config,
            audit: None,
        })
    }

    /// Creates an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if sled cannot start.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::open(db.open_tree(crate::storage::INTEGRITY_TREE)?, LedgerConfig::new())
    }

    /// Sends tamper and missing results to `audit` before returning them.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Hashes `path` and records it under `component_name`.
    ///
    /// Re-registering a name replaces its entry.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::PathNotFound` if `path` does not exist, or an
    /// I/O or store error.
    pub fn register(&self, component_name: &str, path: &Path, trusted: bool) -> Result<IntegrityEntry> {
        let (kind, hash_primary, hash_secondary) = self.compute(path)?.ok_or_else(|| IntegrityError::PathNotFound(path.to_path_buf()))?;

        let entry = IntegrityEntry {
            component_name: component_name.to_string(),
            path: path.to_path_buf(),
            hash_primary,
            hash_secondary,
            kind,
            trusted,
            registered_at: Utc::now(),
        };
        self.tree
            .insert(component_name.as_bytes(), serde_json::to_vec(&entry)?)?;
        self.publish(|map| {
            map.insert(component_name.to_string(), entry.clone());
        });

        info!(
            component = component_name,
            kind = ?entry.kind,
            hash = %&entry.hash_primary[..12],
            "component registered"
        );
        Ok(entry)
    }

    /// Removes a component. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` on store failure.
    pub fn unregister(&self, component_name: &str) -> Result<bool> {
        let existed = self.tree.remove(component_name.as_bytes())?.is_some();
        if existed {
            self.publish(|map| {
                map.remove(component_name);
            });
            info!(component = component_name, "component unregistered");
        }
        Ok(existed)
    }

    /// Verifies `component_name` against the content currently at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the content cannot be hashed (permissions,
    /// I/O) or an audit append fails; every verification outcome is `Ok`.
    pub fn validate(&self, component_name: &str, path: &Path) -> Result<ValidationResult> {
        let Some(entry) = self.entry(component_name) else {
            debug!(component = component_name, "component not registered");
            return Ok(ValidationResult::Unknown);
        };
        self.check(&entry, path)
    }

    /// Verifies a component at the path it was registered with.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_registered(&self, component_name: &str) -> Result<ValidationResult> {
        match self.entry(component_name) {
            Some(entry) => self.check(&entry, &entry.path),
            None => Ok(ValidationResult::Unknown),
        }
    }

    /// Verifies every registered entry against a snapshot of the ledger.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_all(&self) -> Result<ValidationSummary> {
        let snapshot = self.snapshot();
        let results = snapshot
            .values()
            .map(|entry| Ok((entry.component_name.clone(), self.check(entry, &entry.path)?)))
            .collect::<Result<Vec<_>>>()?;

        let summary = ValidationSummary::from_results(results);
        info!(
            verified = summary.verified,
            tampered = summary.tampered,
            missing = summary.missing,
            recommendation = ?summary.recommendation,
            "integrity sweep complete"
        );
        Ok(summary)
    }

    /// Verifies an expected set of components, some of which may never have
    /// been registered.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_components(&self, components: &[(String, PathBuf)]) -> Result<ValidationSummary> {
        let mut results = components
            .iter()
            .map(|(name, path)| Ok((name.clone(), self.validate(name, path)?)))
            .collect::<Result<Vec<_>>>()?;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ValidationSummary::from_results(results))
    }

    /// Looks up an entry.
    #[must_use]
    pub fn entry(&self, component_name: &str) -> Option<IntegrityEntry> {
        self.entries.read().get(component_name).cloned()
    }

    /// A consistent snapshot of all entries.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entries.read())
    }

    /// All entries, in name order.
    #[must_use]
    pub fn entries(&self) -> Vec<IntegrityEntry> {
        self.snapshot().values().cloned().collect()
    }

    /// Number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Database` if the flush fails.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.tree.flush()?)
    }

    fn check(&self, entry: &IntegrityEntry, path: &Path) -> Result<ValidationResult> {
        let Some((_, actual_primary, actual_secondary)) = self.compute(path)? else {
            warn!(component = %entry.component_name, path = %path.display(), "registered component missing");
            self.record(AuditEvent::IntegrityMissing {
                component: entry.component_name.clone(),
                path: path.to_path_buf(),
            })?;
            return Ok(ValidationResult::Missing {
                path: path.to_path_buf(),
            });
        };

        let secondary_matches = match (&entry.hash_secondary, &actual_secondary) {
            (Some(expected), Some(actual)) => expected == actual,
            (None, None) => true,
            _ => false,
        };

        if entry.hash_primary != actual_primary || !secondary_matches {
            warn!(
                component = %entry.component_name,
                expected = %entry.hash_primary,
                actual = %actual_primary,
                "component tampered"
            );
            self.record(AuditEvent::IntegrityTampered {
                component: entry.component_name.clone(),
                expected: entry.hash_primary.clone(),
                actual: actual_primary.clone(),
            })?;
            return Ok(ValidationResult::Tampered {
                expected: entry.hash_primary.clone(),
                actual: actual_primary,
            });
        }

        Ok(ValidationResult::Verified {
            trusted: entry.trusted,
            registered_at: entry.registered_at,
        })
    }

    /// Hashes `path`, or `None` if it does not exist.
    fn compute(&self, path: &Path) -> Result<Option<(ComponentKind, String, Option<String>)>> {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IntegrityError::io(path, e)),
        };

        if metadata.is_dir() {
            let digest = hash_directory(path, &self.config.skip_dirs)?;
            Ok(Some((ComponentKind::Directory, digest, None)))
        } else {
            let digests = hash_file(path)?;
            Ok(Some((ComponentKind::File, digests.primary, Some(digests.secondary))))
        }
    }

    fn record(&self, event: AuditEvent) -> Result<()> {
        if let Some(audit) = &self.audit {
            audit.append(event)?;
        }
        Ok(())
    }

    fn publish(&self, mutate: impl FnOnce(&mut BTreeMap<String, IntegrityEntry>)) {
        let mut guard = self.entries.write();
        let mut next = BTreeMap::clone(&guard);
        mutate(&mut next);
        *guard = Arc::new(next);
    }
}

impl std::fmt::Debug for IntegrityLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityLedger")
            .field("entries", &self.len())
            .field("audited", &self.audit.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_unregistered_is_unknown() {
        let ledger = IntegrityLedger::temporary().unwrap();
        let result = ledger.validate("ghost", Path::new("/nonexistent")).unwrap();
        assert_eq!(result, ValidationResult::Unknown);
    }

    #[test]
    fn test_file_roundtrip_and_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        fs::write(&path, "allow = false").unwrap();

        let ledger = IntegrityLedger::temporary().unwrap();
        let entry = ledger.register("policy", &path, true).unwrap();
        assert_eq!(entry.kind, ComponentKind::File);
        assert!(entry.hash_secondary.is_some());

        assert!(matches!(
            ledger.validate("policy", &path).unwrap(),
            ValidationResult::Verified { trusted: true, .. }
        ));

        fs::write(&path, "allow = true").unwrap();
        match ledger.validate("policy", &path).unwrap() {
            ValidationResult::Tampered { expected, actual } => {
                assert_eq!(expected, entry.hash_primary);
                assert_ne!(expected, actual);
            }
            other => panic!("expected tampered, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        fs::write(&path, "x").unwrap();

        let ledger = IntegrityLedger::temporary().unwrap();
        ledger.register("gone", &path, false).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(matches!(
            ledger.validate_registered("gone").unwrap(),
            ValidationResult::Missing { .. }
        ));
    }

    #[test]
    fn test_register_missing_path_fails() {
        let ledger = IntegrityLedger::temporary().unwrap();
        assert!(matches!(
            ledger.register("x", Path::new("/definitely/not/here"), true),
            Err(IntegrityError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, "a").unwrap();

        let ledger = IntegrityLedger::temporary().unwrap();
        ledger.register("a", &path, true).unwrap();
        let snapshot = ledger.snapshot();

        ledger.register("b", &path, true).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, "a").unwrap();

        let ledger = IntegrityLedger::temporary().unwrap();
        ledger.register("a", &path, true).unwrap();
        assert!(ledger.unregister("a").unwrap());
        assert!(!ledger.unregister("a").unwrap());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_failures_reach_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, "a").unwrap();

        let audit = AuditLog::temporary().unwrap();
        let ledger = IntegrityLedger::temporary().unwrap().with_audit(audit.clone());
        ledger.register("a", &path, true).unwrap();
        fs::write(&path, "b").unwrap();
        ledger.validate_all().unwrap();

        let records = audit.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].event, AuditEvent::IntegrityTampered { .. }));
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, "a").unwrap();
        let db_path = dir.path().join("db");

        {
            let db = sled::open(&db_path).unwrap();
            let ledger = IntegrityLedger::open(db.open_tree("integrity").unwrap(), LedgerConfig::new()).unwrap();
            ledger.register("a", &file, true).unwrap();
            ledger.flush().unwrap();
        }

        let db = sled::open(&db_path).unwrap();
        let ledger = IntegrityLedger::open(db.open_tree("integrity").unwrap(), LedgerConfig::new()).unwrap();
        assert!(ledger.validate("a", &file).unwrap().is_verified());
    }
}
