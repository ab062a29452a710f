//! # Rollback Controller
//!
//! Counts consecutive failures per component and reverts the working tree
//! to the last known-good checkpoint when a component keeps failing.
//!
//! ## State Machine
//!
//! ```text
//!              failures(c) >= threshold
//!   NORMAL ───────────────────────────▶ ROLLING_BACK
//!     ▲                                     │
//!     │                         stash + checkout ok
//!     │ exit_recovery_mode()                ▼
//!     └──────────────────────────────  RECOVERY_MODE
//!                                    (known-good frozen)
//! ```
//!
//! A failed rollback (no checkpoint, unresolvable checkpoint, checkout
//! error) leaves the controller in `NORMAL` with counters intact, is written
//! to the audit log at `error` level, and optionally engages the kill switch.
//!
//! ## Concurrency
//!
//! Counters sit behind one mutex that is never held across an `.await`.
//! The checkout itself holds the shared [`WorkspaceLock`], so it cannot
//! overlap another rollback or a workspace-writing sandbox run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use warden_integrity::{AuditEvent, AuditLog, KillSwitch};
use warden_sandbox::WorkspaceLock;

use crate::error::{Result, RollbackError};
use crate::state::{RollbackState, TestResult};
use crate::vcs::VersionControl;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Consecutive failures that trigger a rollback.
    pub threshold: u32,
    /// Results kept in history.
    pub history_capacity: usize,
    /// Engage the kill switch when a rollback fails.
    pub emergency_stop_on_failure: bool,
}

impl RollbackConfig {
    /// Defaults: threshold 3, 100 history entries, no emergency stop.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            threshold: 3,
            history_capacity: 100,
            emergency_stop_on_failure: false,
        }
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the history capacity.
    #[must_use]
    pub const fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Engages the kill switch on rollback failure.
    #[must_use]
    pub const fn with_emergency_stop(mut self, enabled: bool) -> Self {
        self.emergency_stop_on_failure = enabled;
        self
    }

    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Config` for a zero threshold or capacity.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(RollbackError::Config("threshold must be at least 1".to_string()));
        }
        if self.history_capacity == 0 {
            return Err(RollbackError::Config("history_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What an automatic rollback did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Working tree is at the checkpoint; recovery mode is on.
    Completed {
        /// Checkpoint checked out.
        checkpoint: String,
        /// Stash holding the discarded changes, if there were any.
        stash: Option<String>,
        /// The audit record for this rollback could not be written.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        audit_failed: bool,
    },
    /// Rollback did not happen. Needs an operator.
    Failed {
        /// Why.
        reason: String,
        /// Kill switch was engaged as a result.
        kill_switch_engaged: bool,
        /// The audit record for this failure could not be written.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        audit_failed: bool,
    },
}

/// Result of [`RollbackController::record_result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Consecutive failures after this result.
    pub consecutive_failures: u32,
    /// The counter reached the threshold.
    pub threshold_reached: bool,
    /// Present when a rollback was attempted.
    pub rollback: Option<RollbackOutcome>,
}

/// Distance to a rollback for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Component.
    pub component: String,
    /// Consecutive failures so far.
    pub consecutive_failures: u32,
    /// Failures left before a rollback.
    pub failures_until_rollback: u32,
    /// Recovery mode is on.
    pub in_recovery_mode: bool,
}

/// Snapshot for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStatus {
    /// Configured threshold.
    pub threshold: u32,
    /// Consecutive failures per component.
    pub failure_counts: BTreeMap<String, u32>,
    /// Last known-good checkpoint.
    pub last_known_good: Option<String>,
    /// Recovery mode is on.
    pub in_recovery_mode: bool,
    /// Recent results, oldest first.
    pub history: Vec<TestResult>,
}

/// Tracks failures and performs rollbacks.
pub struct RollbackController {
    config: RollbackConfig,
    state: Mutex<RollbackState>,
    tree: sled::Tree,
    vcs: Arc<dyn VersionControl>,
    workspace: WorkspaceLock,
    audit: Option<AuditLog>,
    kill_switch: Option<KillSwitch>,
}

impl RollbackController {
    /// Opens the controller, restoring state saved in `tree`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or saved state is corrupt.
    pub fn open(
        config: RollbackConfig,
        tree: sled::Tree,
        vcs: Arc<dyn VersionControl>,
        workspace: WorkspaceLock,
    ) -> Result<Self> {
        config.validate()?;
        let state = RollbackState::load(&tree)?;
        if state.in_recovery_mode {
            warn!("rollback controller restored in recovery mode");
        }
        Ok(Self {
            config,
            state: Mutex::new(state),
            tree,
            vcs,
            workspace,
            audit: None,
            kill_switch: None,
        })
    }

    /// Writes rollback events to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Kill switch used when `emergency_stop_on_failure` is set.
    #[must_use]
    pub fn with_kill_switch(mut self, kill_switch: KillSwitch) -> Self {
        self.kill_switch = Some(kill_switch);
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &RollbackConfig {
        &self.config
    }

    /// Records a test or build outcome for `component`.
    ///
    /// A pass resets the component's counter. Outside recovery mode, and
    /// only when no tracked component has an outstanding failure, it also
    /// moves the known-good checkpoint to the current head. A failure
    /// increments the counter; reaching the threshold runs a rollback whose
    /// outcome is returned as data.
    ///
    /// # Errors
    ///
    /// Returns an error only if state cannot be persisted.
    pub async fn record_result(&self, component: &str, passed: bool, details: &str) -> Result<RecordOutcome> {
        // Head is read before taking the state lock.
        let head = if passed && !self.in_recovery_mode() {
            match self.blocking(|vcs| vcs.head()).await {
                Ok(head) => Some(head),
                Err(e) => {
                    warn!(component, error = %e, "cannot read current checkpoint, known-good unchanged");
                    None
                }
            }
        } else {
            None
        };

        let (count, reached) = {
            let mut state = self.state.lock();
            state.push_history(
                TestResult {
                    component: component.to_string(),
                    passed,
                    details: details.to_string(),
                    at: Utc::now(),
                },
                self.config.history_capacity,
            );

            let count = if passed {
                state.failure_counts.insert(component.to_string(), 0);
                // Known-good moves only when every tracked component is green.
                if !state.in_recovery_mode && state.failure_counts.values().all(|c| *c == 0) {
                    if let Some(head) = head {
                        state.last_known_good = Some(head);
                    }
                }
                0
            } else {
                let entry = state.failure_counts.entry(component.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };
            state.save(&self.tree)?;
            (count, count >= self.config.threshold)
        };

        debug!(component, passed, consecutive_failures = count, "result recorded");

        let rollback = if reached {
            warn!(component, failures = count, threshold = self.config.threshold, "failure threshold reached");
            Some(self.rollback(component).await?)
        } else {
            None
        };

        Ok(RecordOutcome {
            consecutive_failures: count,
            threshold_reached: reached,
            rollback,
        })
    }

    /// Leaves recovery mode. Returns whether it was on.
    ///
    /// # Errors
    ///
    /// Returns an error if state or the audit entry cannot be written.
    pub fn exit_recovery_mode(&self) -> Result<bool> {
        let was_on = {
            let mut state = self.state.lock();
            let was_on = std::mem::replace(&mut state.in_recovery_mode, false);
            state.save(&self.tree)?;
            was_on
        };
        if was_on {
            info!("recovery mode exited by operator");
            if let Some(audit) = &self.audit {
                audit.append(AuditEvent::RecoveryExited)?;
            }
        }
        Ok(was_on)
    }

    /// How close `component` is to triggering a rollback.
    #[must_use]
    pub fn assess_risk(&self, component: &str) -> RiskAssessment {
        let state = self.state.lock();
        let failures = state.failures(component);
        RiskAssessment {
            component: component.to_string(),
            consecutive_failures: failures,
            failures_until_rollback: self.config.threshold.saturating_sub(failures),
            in_recovery_mode: state.in_recovery_mode,
        }
    }

    /// True while recovery mode is on.
    #[must_use]
    pub fn in_recovery_mode(&self) -> bool {
        self.state.lock().in_recovery_mode
    }

    /// Current known-good checkpoint.
    #[must_use]
    pub fn last_known_good(&self) -> Option<String> {
        self.state.lock().last_known_good.clone()
    }

    /// Snapshot of counters, checkpoint and history.
    #[must_use]
    pub fn status(&self) -> RollbackStatus {
        let state = self.state.lock();
        RollbackStatus {
            threshold: self.config.threshold,
            failure_counts: state.failure_counts.clone(),
            last_known_good: state.last_known_good.clone(),
            in_recovery_mode: state.in_recovery_mode,
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Sets the known-good checkpoint to the current head. Operator
    /// action, allowed in recovery mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the head cannot be read or state not saved.
    pub async fn mark_known_good(&self) -> Result<String> {
        let head = self.blocking(|vcs| vcs.head()).await?;
        {
            let mut state = self.state.lock();
            state.last_known_good = Some(head.clone());
            state.save(&self.tree)?;
        }
        info!(checkpoint = %head, "known-good checkpoint set");
        Ok(head)
    }

    async fn rollback(&self, component: &str) -> Result<RollbackOutcome> {
        let _workspace = self.workspace.acquire().await;

        let attempt = match self.last_known_good() {
            None => Err(RollbackError::NoCheckpoint),
            Some(target) => {
                let message = format!("warden: rollback after repeated failures of {}", component);
                self.blocking(move |vcs| {
                    let checkpoint = vcs.resolve(&target)?;
                    let stash = vcs.stash(&message)?;
                    vcs.checkout(&checkpoint)?;
                    Ok((checkpoint, stash))
                })
                .await
            }
        };

        match attempt {
            Ok((checkpoint, stash)) => {
                {
                    let mut state = self.state.lock();
                    state.failure_counts.clear();
                    state.in_recovery_mode = true;
                    state.save(&self.tree)?;
                }
                warn!(component, checkpoint = %checkpoint, stash = ?stash, "rolled back, recovery mode on");
                let audit_failed = !self.audit(AuditEvent::RollbackTriggered {
                    component: component.to_string(),
                    checkpoint: checkpoint.clone(),
                    stash: stash.clone(),
                });
                Ok(RollbackOutcome::Completed {
                    checkpoint,
                    stash,
                    audit_failed,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                error!(component, reason = %reason, "ROLLBACK FAILED, operator action required");
                let audit_failed = !self.audit(AuditEvent::RollbackFailed {
                    component: component.to_string(),
                    reason: reason.clone(),
                });
                let kill_switch_engaged = self.emergency_stop(&reason);
                Ok(RollbackOutcome::Failed {
                    reason,
                    kill_switch_engaged,
                    audit_failed,
                })
            }
        }
    }

    fn emergency_stop(&self, reason: &str) -> bool {
        if !self.config.emergency_stop_on_failure {
            return false;
        }
        let Some(kill_switch) = &self.kill_switch else {
            error!("emergency stop requested but no kill switch configured");
            return false;
        };
        match kill_switch.engage(&format!("rollback failed: {}", reason)) {
            Ok(marker) => {
                error!(marker = %marker.display(), "kill switch engaged after rollback failure");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to engage kill switch");
                false
            }
        }
    }

    /// Returns false if a configured audit log rejected the record. The
    /// caller reports that on the outcome instead of failing the rollback.
    fn audit(&self, event: AuditEvent) -> bool {
        let Some(audit) = &self.audit else {
            return true;
        };
        match audit.append(event) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "failed to write rollback audit record");
                false
            }
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn VersionControl) -> Result<T> + Send + 'static,
    {
        let vcs = Arc::clone(&self.vcs);
        tokio::task::spawn_blocking(move || f(vcs.as_ref()))
            .await
            .map_err(|e| RollbackError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for RollbackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RollbackController")
            .field("threshold", &self.config.threshold)
            .field("tracked_components", &state.failure_counts.len())
            .field("in_recovery_mode", &state.in_recovery_mode)
            .field("history_len", &state.history.len())
            .finish()
    }
}
