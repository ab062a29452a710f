//! # Safety Guardian
//!
//! An integrity ledger pinned to a small, rarely-changing baseline of
//! security-critical paths, plus the kill switch and write-tier checks.
//!
//! ## Threat Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Agent edits its own guardrails | Baseline paths are `Immutable`; attempt is logged |
//! | Guardrail edited out of band | Sealed baseline digest, `verify_seal` |
//! | Ledger tree edited to hide a change | Seal digest covers every baseline entry |
//! | Runaway agent | Kill switch denies everything |
//!
//! ## Write Tiers
//!
//! | Tier | Result | Source |
//! |------|--------|--------|
//! | `Immutable` | hard deny + violation record | baseline paths and everything under baseline directories |
//! | `ApprovalRequired` | soft deny | approval glob patterns |
//! | `Free` | no opinion | everything else |
//!
//! A path matching both lists is `Immutable`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use warden_auth::{normalize_path, PathPattern};

use crate::audit::{AuditEvent, AuditLog, ViolationRecord};
use crate::error::{IntegrityError, Result};
use crate::killswitch::{KillSwitch, KillSwitchTrigger};
use crate::ledger::{IntegrityLedger, LedgerConfig};
use crate::models::IntegrityEntry;
use crate::storage::{Store, BASELINE_TREE, SEAL_TREE};

const SEAL_KEY: &str = "current";

/// Classification of a write target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum WriteTier {
    /// Freely writable.
    Free,
    /// Writable after human approval.
    ApprovalRequired {
        /// Pattern that matched.
        pattern: String,
    },
    /// Never writable.
    Immutable,
}

/// Stored seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealRecord {
    /// When the baseline was sealed.
    pub sealed_at: DateTime<Utc>,
    /// SHA-256 over every baseline entry.
    pub digest: String,
    /// Sealed component names.
    pub components: Vec<String>,
}

/// Result of [`SafetyGuardian::verify_seal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SealStatus {
    /// No seal has been created.
    NotSealed,
    /// Baseline matches the seal.
    Intact {
        /// When the seal was created.
        sealed_at: DateTime<Utc>,
    },
    /// Something changed since sealing.
    Broken {
        /// Components (or the seal record itself) that failed.
        failures: Vec<String>,
    },
}

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    /// No issues.
    Healthy,
    /// At least one issue.
    Unhealthy,
}

/// Output of [`SafetyGuardian::audit_system`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAudit {
    /// Overall verdict.
    pub verdict: Health,
    /// Every baseline path exists.
    pub baseline_present: bool,
    /// A seal record exists.
    pub sealed: bool,
    /// The seal verified intact.
    pub integrity_valid: bool,
    /// Active kill switch trigger.
    pub kill_switch: Option<KillSwitchTrigger>,
    /// Human-readable problems.
    pub issues: Vec<String>,
}

/// Configuration for [`SafetyGuardian`].
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Workspace root; relative paths resolve against it.
    pub root: PathBuf,
    /// Baseline paths (files or directories).
    pub baseline: Vec<PathBuf>,
    /// Glob patterns for approval-required writes.
    pub approval_patterns: Vec<String>,
    /// Kill switch triggers.
    pub kill_switch: KillSwitch,
    /// Ledger settings for the baseline.
    pub ledger: LedgerConfig,
}

impl GuardianConfig {
    /// Empty baseline under `root`, default kill switch.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            kill_switch: KillSwitch::for_root(&root),
            root,
            baseline: Vec::new(),
            approval_patterns: Vec::new(),
            ledger: LedgerConfig::new(),
        }
    }

    /// Sets the baseline.
    #[must_use]
    pub fn with_baseline(mut self, baseline: Vec<PathBuf>) -> Self {
        self.baseline = baseline;
        self
    }

    /// Sets the approval patterns.
    #[must_use]
    pub fn with_approval_patterns(mut self, patterns: Vec<String>) -> Self {
        self.approval_patterns = patterns;
        self
    }

    /// Replaces the kill switch.
    #[must_use]
    pub fn with_kill_switch(mut self, kill_switch: KillSwitch) -> Self {
        self.kill_switch = kill_switch;
        self
    }
}

#[derive(Debug, Clone)]
struct BaselinePath {
    name: String,
    path: PathBuf,
    normalized: String,
}

/// Baseline ledger, kill switch and write tiers.
pub struct SafetyGuardian {
    root: PathBuf,
    baseline: Vec<BaselinePath>,
    approval: Vec<PathPattern>,
    kill_switch: KillSwitch,
    ledger: IntegrityLedger,
    seal_tree: sled::Tree,
    audit: AuditLog,
}

impl SafetyGuardian {
    /// Opens the guardian's trees in `store`.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Pattern` for a bad approval pattern,
    /// `IntegrityError::Io` if a relative root cannot be made absolute, or a
    /// store error.
    pub fn open(config: GuardianConfig, store: &Store, audit: AuditLog) -> Result<Self> {
        let root = absolute_root(&config.root)?;
        let approval = config
            .approval_patterns
            .iter()
            .map(|p| PathPattern::compile(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let baseline = config
            .baseline
            .iter()
            .map(|p| {
                let path = if p.is_absolute() { p.clone() } else { root.join(p) };
                BaselinePath {
                    name: p.to_string_lossy().replace('\\', "/"),
                    normalized: normalize_path(&path.to_string_lossy()),
                    path,
                }
            })
            .collect();

        let ledger = IntegrityLedger::open(store.tree(BASELINE_TREE)?, config.ledger.clone())?.with_audit(audit.clone());

        Ok(Self {
            root,
            baseline,
            approval,
            kill_switch: config.kill_switch,
            ledger,
            seal_tree: store.tree(SEAL_TREE)?,
            audit,
        })
    }

    /// Guardian over an in-memory store.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn temporary(config: GuardianConfig) -> Result<Self> {
        let store = Store::temporary()?;
        let audit = AuditLog::open(store.db())?;
        Self::open(config, &store, audit)
    }

    // =========================================================================
    // Kill switch
    // =========================================================================

    /// The active kill switch trigger, if any.
    #[must_use]
    pub fn kill_switch_status(&self) -> Option<KillSwitchTrigger> {
        self.kill_switch.status()
    }

    /// Engages the kill switch and records it.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker or audit record cannot be written.
    pub fn engage_kill_switch(&self, reason: &str) -> Result<PathBuf> {
        let marker = self.kill_switch.engage(reason)?;
        self.audit.append(AuditEvent::KillSwitchEngaged {
            reason: reason.to_string(),
            marker: marker.clone(),
        })?;
        Ok(marker)
    }

    /// Removes the kill switch markers and records it.
    ///
    /// # Errors
    ///
    /// Returns an error if a marker or audit record cannot be written.
    pub fn release_kill_switch(&self) -> Result<usize> {
        let markers_removed = self.kill_switch.release()?;
        self.audit.append(AuditEvent::KillSwitchReleased { markers_removed })?;
        Ok(markers_removed)
    }

    /// The kill switch.
    #[must_use]
    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    // =========================================================================
    // Write tiers
    // =========================================================================

    /// Classifies a write target without side effects.
    #[must_use]
    pub fn classify(&self, path: &str) -> WriteTier {
        let resolved = self.resolve(path);

        let immutable = self.baseline.iter().any(|b| {
            resolved == b.normalized
                || resolved
                    .strip_prefix(b.normalized.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        });
        if immutable {
            return WriteTier::Immutable;
        }

        let relative = self.relative(&resolved);
        self.approval
            .iter()
            .find(|pattern| {
                pattern.matches_normalized(&resolved)
                    || relative.as_deref().is_some_and(|rel| pattern.matches_normalized(rel))
            })
            .map_or(WriteTier::Free, |pattern| WriteTier::ApprovalRequired {
                pattern: pattern.as_str().to_string(),
            })
    }

    /// Classifies a write and records a violation if the target is immutable.
    ///
    /// The violation is recorded whoever the principal is.
    ///
    /// # Errors
    ///
    /// Returns an error if the violation cannot be recorded.
    pub fn check_write(&self, principal: &str, operation: &str, path: &str) -> Result<WriteTier> {
        let tier = self.classify(path);
        if tier == WriteTier::Immutable {
            let resolved = self.resolve(path);
            warn!(principal, operation, path = %resolved, "write to immutable path refused");
            self.audit.append(AuditEvent::Violation(ViolationRecord {
                principal: principal.to_string(),
                operation: operation.to_string(),
                path: resolved,
                tier: tier.clone(),
                at: Utc::now(),
            }))?;
        }
        Ok(tier)
    }

    /// Every recorded violation.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit log cannot be read.
    pub fn violations(&self) -> Result<Vec<ViolationRecord>> {
        self.audit.violations()
    }

    // =========================================================================
    // Seal
    // =========================================================================

    /// Registers every baseline path and stores a seal over them.
    ///
    /// Entries for paths no longer in the baseline are dropped.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::BaselineMissing` if a baseline path does not
    /// exist, `IntegrityError::Config` if the baseline is empty, or a store
    /// error.
    pub fn seal(&self) -> Result<SealRecord> {
        if self.baseline.is_empty() {
            return Err(IntegrityError::Config("baseline is empty".to_string()));
        }
        if let Some(missing) = self.baseline.iter().find(|b| !b.path.exists()) {
            return Err(IntegrityError::BaselineMissing(missing.path.clone()));
        }

        for stale in self.ledger.entries() {
            if !self.baseline.iter().any(|b| b.name == stale.component_name) {
                self.ledger.unregister(&stale.component_name)?;
            }
        }
        for b in &self.baseline {
            self.ledger.register(&b.name, &b.path, true)?;
        }

        let entries = self.ledger.entries();
        let record = SealRecord {
            sealed_at: Utc::now(),
            digest: seal_digest(&entries),
            components: entries.iter().map(|e| e.component_name.clone()).collect(),
        };
        self.seal_tree.insert(SEAL_KEY, serde_json::to_vec(&record)?)?;
        self.seal_tree.flush()?;
        self.audit.append(AuditEvent::SealCreated {
            digest: record.digest.clone(),
            components: record.components.len(),
        })?;

        info!(components = record.components.len(), digest = %&record.digest[..12], "baseline sealed");
        Ok(record)
    }

    /// The stored seal, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the seal record is unreadable.
    pub fn seal_record(&self) -> Result<Option<SealRecord>> {
        match self.seal_tree.get(SEAL_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Checks the baseline against its seal.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing or the store fails.
    pub fn verify_seal(&self) -> Result<SealStatus> {
        let Some(record) = self.seal_record()? else {
            return Ok(SealStatus::NotSealed);
        };

        let mut failures = Vec::new();
        if seal_digest(&self.ledger.entries()) != record.digest {
            failures.push("seal record".to_string());
        }
        for name in &record.components {
            if !self.ledger.validate_registered(name)?.is_verified() {
                failures.push(name.clone());
            }
        }
        for b in &self.baseline {
            if !record.components.contains(&b.name) {
                failures.push(b.name.clone());
            }
        }

        if failures.is_empty() {
            Ok(SealStatus::Intact {
                sealed_at: record.sealed_at,
            })
        } else {
            warn!(failures = ?failures, "baseline seal broken");
            self.audit.append(AuditEvent::SealBroken {
                failures: failures.clone(),
            })?;
            Ok(SealStatus::Broken { failures })
        }
    }

    /// Aggregates baseline presence, seal, integrity and kill switch state.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing or the store fails.
    pub fn audit_system(&self) -> Result<SystemAudit> {
        let mut issues = Vec::new();

        let missing: Vec<&BaselinePath> = self.baseline.iter().filter(|b| !b.path.exists()).collect();
        for b in &missing {
            issues.push(format!("baseline path missing: {}", b.path.display()));
        }
        if self.baseline.is_empty() {
            issues.push("no baseline configured".to_string());
        }

        let status = self.verify_seal()?;
        let sealed = !matches!(status, SealStatus::NotSealed);
        let integrity_valid = matches!(status, SealStatus::Intact { .. });
        match &status {
            SealStatus::NotSealed => issues.push("baseline has not been sealed".to_string()),
            SealStatus::Broken { failures } => {
                issues.push(format!("seal broken: {}", failures.join(", ")));
            }
            SealStatus::Intact { .. } => {}
        }

        let kill_switch = self.kill_switch.status();
        if let Some(trigger) = &kill_switch {
            issues.push(format!("kill switch engaged ({})", trigger));
        }

        let verdict = if issues.is_empty() { Health::Healthy } else { Health::Unhealthy };
        info!(verdict = ?verdict, issues = issues.len(), "system audit");

        Ok(SystemAudit {
            verdict,
            baseline_present: missing.is_empty() && !self.baseline.is_empty(),
            sealed,
            integrity_valid,
            kill_switch,
            issues,
        })
    }

    /// The baseline ledger.
    #[must_use]
    pub fn ledger(&self) -> &IntegrityLedger {
        &self.ledger
    }

    /// The audit log.
    #[must_use]
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> String {
        let unified = path.replace('\\', "/");
        if unified.starts_with('/') || Path::new(path).is_absolute() {
            normalize_path(&unified)
        } else {
            normalize_path(&format!("{}/{}", self.root.to_string_lossy(), unified))
        }
    }

    fn relative(&self, resolved: &str) -> Option<String> {
        let root = normalize_path(&self.root.to_string_lossy());
        resolved
            .strip_prefix(root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
    }
}

impl std::fmt::Debug for SafetyGuardian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyGuardian")
            .field("root", &self.root)
            .field("baseline", &self.baseline.len())
            .field("approval_patterns", &self.approval.len())
            .finish()
    }
}

/// Anchors a relative root at the working directory so relative and
/// absolute requests for the same file resolve alike.
fn absolute_root(root: &Path) -> Result<PathBuf> {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir().map_err(|e| IntegrityError::io(root, e))?.join(root)
    };
    Ok(PathBuf::from(normalize_path(&absolute.to_string_lossy())))
}

fn seal_digest(entries: &[IntegrityEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.component_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.hash_primary.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.hash_secondary.as_deref().unwrap_or("").as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, SafetyGuardian) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("policy")).unwrap();
        fs::write(dir.path().join("policy/roles.toml"), "[roles]").unwrap();
        fs::write(dir.path().join("guard.sh"), "#!/bin/sh").unwrap();

        let config = GuardianConfig::new(dir.path())
            .with_baseline(vec![PathBuf::from("policy"), PathBuf::from("guard.sh")])
            .with_approval_patterns(vec!["**/Cargo.toml".to_string(), "policy/**".to_string()])
            .with_kill_switch(KillSwitch::new(
                vec![dir.path().join(".warden").join("KILL_SWITCH")],
                "WARDEN_GUARDIAN_UNIT_TEST",
            ));
        let guardian = SafetyGuardian::temporary(config).unwrap();
        (dir, guardian)
    }

    #[test]
    fn test_tiers() {
        let (dir, guardian) = setup();
        let root = dir.path().to_string_lossy().to_string();

        assert_eq!(guardian.classify("guard.sh"), WriteTier::Immutable);
        assert_eq!(guardian.classify(&format!("{}/policy/roles.toml", root)), WriteTier::Immutable);
        assert_eq!(guardian.classify("policy"), WriteTier::Immutable);
        assert_eq!(guardian.classify("policyx/file"), WriteTier::Free);
        assert_eq!(guardian.classify("src/../guard.sh"), WriteTier::Immutable);
        assert!(matches!(
            guardian.classify("crates/a/Cargo.toml"),
            WriteTier::ApprovalRequired { .. }
        ));
        assert_eq!(guardian.classify("src/main.rs"), WriteTier::Free);
    }

    #[test]
    fn test_immutable_wins_over_approval() {
        let (_dir, guardian) = setup();
        // `policy/**` is also an approval pattern.
        assert_eq!(guardian.classify("policy/roles.toml"), WriteTier::Immutable);
    }

    #[test]
    fn test_violation_recorded() {
        let (_dir, guardian) = setup();
        assert_eq!(guardian.check_write("admin", "Write", "guard.sh").unwrap(), WriteTier::Immutable);
        guardian.check_write("dev", "Write", "src/lib.rs").unwrap();

        let violations = guardian.violations().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].principal, "admin");
        assert!(violations[0].path.ends_with("/guard.sh"));
    }

    #[test]
    fn test_relative_root_matches_absolute_requests() {
        let config = GuardianConfig::new(".")
            .with_baseline(vec![PathBuf::from("policy.toml")])
            .with_kill_switch(KillSwitch::new(Vec::new(), "WARDEN_GUARDIAN_RELATIVE_ROOT_TEST"));
        let guardian = SafetyGuardian::temporary(config).unwrap();
        let cwd = std::env::current_dir().unwrap();
        let absolute = format!("{}/policy.toml", cwd.to_string_lossy());

        assert!(guardian.root().is_absolute());
        assert_eq!(guardian.classify("policy.toml"), WriteTier::Immutable);
        assert_eq!(guardian.classify("./policy.toml"), WriteTier::Immutable);
        assert_eq!(guardian.classify(&absolute), WriteTier::Immutable);

        assert_eq!(guardian.check_write("agent", "Write", &absolute).unwrap(), WriteTier::Immutable);
        let violations = guardian.violations().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, normalize_path(&absolute));
    }

    #[test]
    fn test_seal_and_verify() {
        let (dir, guardian) = setup();
        assert_eq!(guardian.verify_seal().unwrap(), SealStatus::NotSealed);

        let record = guardian.seal().unwrap();
        assert_eq!(record.components.len(), 2);
        assert!(matches!(guardian.verify_seal().unwrap(), SealStatus::Intact { .. }));

        fs::write(dir.path().join("policy/roles.toml"), "[roles]\nadmin = {}").unwrap();
        match guardian.verify_seal().unwrap() {
            SealStatus::Broken { failures } => assert_eq!(failures, vec!["policy".to_string()]),
            other => panic!("expected broken seal, got {:?}", other),
        }
    }

    #[test]
    fn test_seal_requires_baseline_present() {
        let (dir, guardian) = setup();
        fs::remove_file(dir.path().join("guard.sh")).unwrap();
        assert!(matches!(guardian.seal(), Err(IntegrityError::BaselineMissing(_))));
    }

    #[test]
    fn test_audit_system() {
        let (dir, guardian) = setup();

        let before = guardian.audit_system().unwrap();
        assert_eq!(before.verdict, Health::Unhealthy);
        assert!(!before.sealed);

        guardian.seal().unwrap();
        let sealed = guardian.audit_system().unwrap();
        assert_eq!(sealed.verdict, Health::Healthy, "{:?}", sealed.issues);
        assert!(sealed.baseline_present && sealed.integrity_valid);

        guardian.engage_kill_switch("drill").unwrap();
        let stopped = guardian.audit_system().unwrap();
        assert_eq!(stopped.verdict, Health::Unhealthy);
        assert!(stopped.kill_switch.is_some());

        guardian.release_kill_switch().unwrap();
        fs::remove_file(dir.path().join("guard.sh")).unwrap();
        let broken = guardian.audit_system().unwrap();
        assert!(!broken.baseline_present);
        assert!(!broken.integrity_valid);
    }
}
