//! The unified Warden facade.
//!
//! [`Warden`] owns one of each component, wired to a single sled store and
//! a single audit log, and exposes the calls a host process makes around an
//! agent operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use warden_auth::{
    AuthorizationPipeline, CredentialService, Decision, DecisionCode, MasterSecret, OperationRequest,
    RevocationList, RoleRegistry, Stage,
};
use warden_integrity::storage::{INTEGRITY_TREE, REVOCATION_TREE, ROLLBACK_TREE};
use warden_integrity::{
    spawn_sweep, AuditLog, Health, IntegrityEntry, IntegrityLedger, SafetyGuardian, Store, SystemAudit,
    ValidationResult, ValidationSummary, WriteTier,
};
use warden_rollback::{
    GitVersionControl, RecordOutcome, RollbackController, RollbackOutcome, RollbackStatus, VersionControl,
};
use warden_sandbox::{
    select_mode, Availability, ExecutionMode, ExecutionRequest, ExecutionResult, SandboxError, SandboxRouter,
    TaskProfile, WorkspaceLock,
};

use crate::config::{UnknownPolicy, WardenConfig};
use crate::error::Result;

/// A command an agent wants to run, plus how to account for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTask {
    /// Shell command line.
    pub command: String,
    /// Working directory; the workspace root if `None`.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Drives mode selection.
    #[serde(default)]
    pub profile: TaskProfile,
    /// Overrides the sandbox default timeout.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Records the run's pass/fail against this component.
    #[serde(default)]
    pub component: Option<String>,
}

impl ExecutionTask {
    /// A read-only task with no result recording.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            profile: TaskProfile::new(),
            timeout: None,
            component: None,
        }
    }

    /// Sets the profile.
    #[must_use]
    pub fn with_profile(mut self, profile: TaskProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Records the outcome for `component`.
    #[must_use]
    pub fn recording(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

/// What happened to an execution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Authorization and safety decision. A denied decision means nothing ran.
    pub decision: Decision,
    /// Mode used, when the command ran.
    pub mode: Option<ExecutionMode>,
    /// Process result, when the command ran.
    pub result: Option<ExecutionResult>,
    /// Rollback bookkeeping, when the task records a component.
    pub record: Option<RecordOutcome>,
    /// Notable post-run condition: `ExecutionTimeout` or `RollbackTriggered`.
    pub flag: Option<DecisionCode>,
}

impl ExecutionOutcome {
    fn refused(decision: Decision) -> Self {
        Self {
            decision,
            mode: None,
            result: None,
            record: None,
            flag: None,
        }
    }
}

/// Whole-system health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardenAudit {
    /// Overall verdict.
    pub verdict: Health,
    /// Guardian report (baseline, seal, kill switch).
    pub system: SystemAudit,
    /// Registered component sweep.
    pub components: ValidationSummary,
    /// Rollback controller state.
    pub rollback: RollbackStatus,
    /// Sandbox availability as last observed.
    pub sandbox: Availability,
    /// Recorded write-tier violations.
    pub violations: usize,
}

/// The unified Warden facade.
///
/// # Security Model
///
/// Every operation passes, in order:
/// 1. Kill switch (denies everything while engaged)
/// 2. Write tiers for mutating operations on a path
/// 3. Authorization Pipeline (token, role, operation, path, approval)
/// 4. Sandbox Router, for operations that execute code
///
/// Each stage is fail-closed: internal errors become denials.
pub struct Warden {
    config: WardenConfig,
    store: Store,
    audit: AuditLog,
    pipeline: AuthorizationPipeline,
    guardian: SafetyGuardian,
    ledger: Arc<IntegrityLedger>,
    sandbox: SandboxRouter,
    rollback: RollbackController,
}

impl Warden {
    /// Opens Warden, reading the master secret from the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, the secret is missing or
    /// short, or the store cannot be opened.
    pub fn open(config: WardenConfig) -> Result<Self> {
        let secret = MasterSecret::from_env(&config.credentials.secret_env)?;
        Self::open_with_secret(config, secret)
    }

    /// Opens Warden with an explicit secret, using git for checkpoints.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with_secret(config: WardenConfig, secret: MasterSecret) -> Result<Self> {
        let vcs = Arc::new(GitVersionControl::new(config.guardian.root.clone()));
        Self::open_with(config, secret, vcs)
    }

    /// Opens Warden with an explicit secret and version control.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with(config: WardenConfig, secret: MasterSecret, vcs: Arc<dyn VersionControl>) -> Result<Self> {
        config.validate()?;

        let store = Store::open(config.store_path())?;
        let audit = AuditLog::open(store.db())?;

        let revocations = RevocationList::open(store.tree(REVOCATION_TREE)?)?;
        let credentials = CredentialService::new(secret, config.credentials.credential_config(), revocations)?;
        let roles = if config.roles.is_empty() {
            RoleRegistry::builtin()
        } else {
            RoleRegistry::from_definitions(&config.roles)?
        };
        let pipeline = AuthorizationPipeline::new(Arc::new(credentials), Arc::new(roles));

        let guardian = SafetyGuardian::open(config.guardian_config(), &store, audit.clone())?;
        let ledger = Arc::new(
            IntegrityLedger::open(store.tree(INTEGRITY_TREE)?, config.integrity.ledger_config())?
                .with_audit(audit.clone()),
        );

        let workspace = WorkspaceLock::new();
        let sandbox = SandboxRouter::new(config.sandbox.clone(), workspace.clone())?;
        let rollback = RollbackController::open(config.rollback.clone(), store.tree(ROLLBACK_TREE)?, vcs, workspace)?
            .with_audit(audit.clone())
            .with_kill_switch(config.guardian.kill_switch());

        info!(
            root = %config.guardian.root.display(),
            roles = pipeline.roles().len(),
            components = ledger.len(),
            "warden initialized"
        );

        Ok(Self {
            config,
            store,
            audit,
            pipeline,
            guardian,
            ledger,
            sandbox,
            rollback,
        })
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    /// Decides whether an operation may proceed.
    ///
    /// Kill switch, then write tiers for mutating operations, then the
    /// Authorization Pipeline. A path in the approval tier turns an allow
    /// into a soft deny.
    #[must_use]
    pub fn pre_operation_check(&self, request: &OperationRequest) -> Decision {
        if let Some(trigger) = self.guardian.kill_switch_status() {
            warn!(
                principal = %request.principal_id,
                operation = %request.operation,
                trigger = %trigger,
                "operation denied by kill switch"
            );
            return Decision::deny(
                DecisionCode::KillSwitchActive,
                format!("emergency stop engaged ({})", trigger),
                Stage::Received,
            );
        }

        let mut approval_pattern = None;
        if let Some(path) = request.resource_path.as_deref() {
            if self.config.guardian.is_mutating(&request.operation) {
                match self.write_tier(&request.principal_id, &request.operation, path) {
                    Ok(pattern) => approval_pattern = pattern,
                    Err(denial) => return denial,
                }
            }
        }

        let decision = self.pipeline.enforce(request);
        if !decision.allowed {
            return decision;
        }

        match approval_pattern {
            Some(pattern) => {
                info!(
                    principal = %request.principal_id,
                    operation = %request.operation,
                    pattern = %pattern,
                    "protected path needs approval"
                );
                Decision::approval_required(
                    format!(
                        "{} on {} matches protected pattern '{}'",
                        request.operation,
                        request.resource_path.as_deref().unwrap_or_default(),
                        pattern
                    ),
                    decision.budget_hint,
                    Stage::ApprovalChecked,
                )
            }
            None => decision,
        }
    }

    /// Maps the guardian's write tier for `path` to the pattern needing
    /// approval, or to a denial.
    fn write_tier(
        &self,
        principal: &str,
        operation: &str,
        path: &str,
    ) -> std::result::Result<Option<String>, Decision> {
        match self.guardian.check_write(principal, operation, path) {
            Ok(WriteTier::Free) => Ok(None),
            Ok(WriteTier::ApprovalRequired { pattern }) => Ok(Some(pattern)),
            Ok(WriteTier::Immutable) => Err(Decision::deny(
                DecisionCode::PathDenied,
                format!("{} is part of the protected baseline", path),
                Stage::Received,
            )),
            Err(e) => {
                error!(error = %e, path, "write-tier check failed, denying");
                Err(Decision::deny(
                    DecisionCode::InternalError,
                    format!("write-tier check failed: {}", e),
                    Stage::Received,
                ))
            }
        }
    }

    /// Checks that a granted request actually covers running `task`: the
    /// request must name the execute operation, and a mode that can modify
    /// the workspace needs the write operation and a writable working
    /// directory.
    fn authorize_task(
        &self,
        request: &OperationRequest,
        granted: &Decision,
        task: &ExecutionTask,
        mode: ExecutionMode,
        cwd: &Path,
    ) -> Option<Decision> {
        let guardian = &self.config.guardian;
        if !request.operation.eq_ignore_ascii_case(&guardian.execute_operation) {
            warn!(
                principal = %request.principal_id,
                operation = %request.operation,
                "execution requested under a non-execute operation"
            );
            return Some(Decision::deny(
                DecisionCode::OperationDenied,
                format!(
                    "running a command requires operation '{}', not '{}'",
                    guardian.execute_operation, request.operation
                ),
                Stage::OperationChecked,
            ));
        }
        if !mode.writes_workspace() {
            return None;
        }

        // The grant carries the role the token was authorized under.
        let can_write = granted
            .budget_hint
            .as_ref()
            .and_then(|hint| self.pipeline.roles().get(&hint.role))
            .is_some_and(|role| role.permits_operation(&guardian.write_operation));
        if !can_write {
            warn!(
                principal = %request.principal_id,
                command = %task.command,
                mode = %mode,
                "writing task refused: role lacks write operation"
            );
            return Some(Decision::deny(
                DecisionCode::OperationDenied,
                format!("{} execution requires operation '{}'", mode, guardian.write_operation),
                Stage::OperationChecked,
            ));
        }

        let cwd = cwd.to_string_lossy();
        match self.write_tier(&request.principal_id, &guardian.write_operation, &cwd) {
            Ok(None) => None,
            Ok(Some(pattern)) => Some(Decision::approval_required(
                format!("writing task in {} matches protected pattern '{}'", cwd, pattern),
                granted.budget_hint.clone(),
                Stage::ApprovalChecked,
            )),
            Err(denial) => Some(denial),
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Authorizes, then runs a command in the sandbox and optionally records
    /// the result.
    ///
    /// The request must name the configured execute operation. A mode that
    /// can modify the workspace also needs the write operation and a
    /// working directory outside the protected baseline.
    ///
    /// Refusals (denied decision, recovery mode, sandbox unavailable) come
    /// back as an outcome with a denied decision and no result.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or rollback state
    /// cannot be persisted.
    pub async fn execute(&self, request: &OperationRequest, task: &ExecutionTask) -> Result<ExecutionOutcome> {
        let decision = self.pre_operation_check(request);
        if !decision.allowed {
            return Ok(ExecutionOutcome::refused(decision));
        }

        let mode = select_mode(&task.profile);
        let cwd = task.cwd.clone().unwrap_or_else(|| self.config.guardian.root.clone());
        if let Some(denial) = self.authorize_task(request, &decision, task, mode, &cwd) {
            return Ok(ExecutionOutcome::refused(denial));
        }

        if mode == ExecutionMode::FullAuto && self.rollback.in_recovery_mode() {
            warn!(command = %task.command, "autonomous run refused in recovery mode");
            return Ok(ExecutionOutcome::refused(Decision::deny(
                DecisionCode::RecoveryModeActive,
                "autonomous execution is suspended until recovery mode is exited",
                Stage::Decided,
            )));
        }

        let mut sandbox_request = ExecutionRequest::new(task.command.clone(), mode, cwd);
        sandbox_request.timeout = task.timeout;

        let result = match self.sandbox.execute(&sandbox_request).await {
            Ok(result) => result,
            Err(SandboxError::Unavailable(reason)) => {
                return Ok(ExecutionOutcome::refused(Decision::deny(
                    DecisionCode::SandboxUnavailable,
                    reason,
                    Stage::Decided,
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut flag = result.timed_out.then_some(DecisionCode::ExecutionTimeout);
        if result.timed_out {
            warn!(command = %task.command, "execution timed out");
        }

        let record = match &task.component {
            Some(component) => {
                let details = format!("`{}` exited {}", task.command, result.exit_code);
                let record = self.rollback.record_result(component, result.success, &details).await?;
                if matches!(record.rollback, Some(RollbackOutcome::Completed { .. })) {
                    flag = Some(DecisionCode::RollbackTriggered);
                }
                Some(record)
            }
            None => None,
        };

        debug!(mode = %mode, exit_code = result.exit_code, sandboxed = result.sandboxed, "execution finished");
        Ok(ExecutionOutcome {
            decision,
            mode: Some(mode),
            result: Some(result),
            record,
            flag,
        })
    }

    /// Feeds an externally observed test/build result to the Rollback
    /// Controller.
    ///
    /// # Errors
    ///
    /// Returns an error if rollback state cannot be persisted.
    pub async fn record_result(&self, component: &str, passed: bool, details: &str) -> Result<RecordOutcome> {
        Ok(self.rollback.record_result(component, passed, details).await?)
    }

    // =========================================================================
    // Integrity
    // =========================================================================

    /// Registers a component's current content as its trusted digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be hashed or stored.
    pub fn register_component(&self, name: &str, path: &Path, trusted: bool) -> Result<IntegrityEntry> {
        Ok(self.ledger.register(name, path, trusted)?)
    }

    /// Pre-load check of a component against the ledger.
    ///
    /// Tampered and missing components are denied; unknown ones follow the
    /// configured policy. Ledger errors deny.
    #[must_use]
    pub fn check_component(&self, name: &str, path: &Path) -> Decision {
        let result = match self.ledger.validate(name, path) {
            Ok(result) => result,
            Err(e) => {
                error!(component = name, error = %e, "integrity check failed, denying");
                return Decision::deny(
                    DecisionCode::InternalError,
                    format!("integrity check failed: {}", e),
                    Stage::Decided,
                );
            }
        };

        match result {
            ValidationResult::Verified { .. } => Decision::allow(format!("{} verified", name), None),
            ValidationResult::Unknown => match self.config.integrity.unknown_policy {
                UnknownPolicy::Allow => Decision::allow(format!("{} is not registered", name), None),
                UnknownPolicy::Warn => {
                    warn!(component = name, "loading unregistered component");
                    Decision::allow(
                        format!("{}: {} is not registered", DecisionCode::IntegrityUnknown, name),
                        None,
                    )
                }
                UnknownPolicy::Deny => Decision::deny(
                    DecisionCode::IntegrityUnknown,
                    format!("{} is not registered", name),
                    Stage::Decided,
                ),
            },
            ValidationResult::Missing { path } => Decision::deny(
                DecisionCode::IntegrityMissing,
                format!("{} not found at {}", name, path.display()),
                Stage::Decided,
            ),
            ValidationResult::Tampered { expected, actual } => Decision::deny(
                DecisionCode::IntegrityTampered,
                format!("{} changed (expected {}, found {})", name, short(&expected), short(&actual)),
                Stage::Decided,
            ),
        }
    }

    /// Starts the periodic component sweep if an interval is configured.
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn start_sweep(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.integrity.sweep_interval()?;
        info!(interval_secs = interval.as_secs(), "integrity sweep started");
        Some(spawn_sweep(Arc::clone(&self.ledger), interval))
    }

    /// Full health report: guardian audit, component sweep, rollback state.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing or the store fails.
    pub fn audit_system(&self) -> Result<WardenAudit> {
        let system = self.guardian.audit_system()?;
        let components = self.ledger.validate_all()?;
        let rollback = self.rollback.status();
        let violations = self.guardian.violations()?.len();

        let healthy = system.verdict == Health::Healthy
            && components.tampered == 0
            && components.missing == 0
            && !rollback.in_recovery_mode;
        let verdict = if healthy { Health::Healthy } else { Health::Unhealthy };
        info!(verdict = ?verdict, in_recovery_mode = rollback.in_recovery_mode, "warden audit");

        Ok(WardenAudit {
            verdict,
            system,
            components,
            rollback,
            sandbox: self.sandbox.availability(),
            violations,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Authorization Pipeline (principal lifecycle, credentials, roles).
    #[must_use]
    pub fn pipeline(&self) -> &AuthorizationPipeline {
        &self.pipeline
    }

    /// Safety Guardian (kill switch, seal, write tiers).
    #[must_use]
    pub fn guardian(&self) -> &SafetyGuardian {
        &self.guardian
    }

    /// Component Integrity Ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<IntegrityLedger> {
        &self.ledger
    }

    /// Sandbox Router.
    #[must_use]
    pub fn sandbox(&self) -> &SandboxRouter {
        &self.sandbox
    }

    /// Rollback Controller.
    #[must_use]
    pub fn rollback(&self) -> &RollbackController {
        &self.rollback
    }

    /// Durable audit log.
    #[must_use]
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Flushes the store.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Warden {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warden")
            .field("root", &self.config.guardian.root)
            .field("principals", &self.pipeline.principal_count())
            .field("components", &self.ledger.len())
            .field("rollback", &self.rollback)
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}
