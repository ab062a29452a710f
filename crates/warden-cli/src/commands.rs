//! Subcommand handlers.
//!
//! Emergency commands (`kill-switch`, `rollback`, `sandbox`) open only the
//! components they need so they work without the master secret.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;
use tracing::{info, warn};

use warden_core::{DecisionCode, ExecutionTask, Health, OperationRequest, Warden, WardenConfig};
use warden_integrity::storage::ROLLBACK_TREE;
use warden_integrity::{AuditLog, Recommendation, SafetyGuardian, Store};
use warden_rollback::{GitVersionControl, RollbackController, RollbackOutcome};
use warden_sandbox::{Availability, SandboxRouter, TaskProfile, WorkspaceLock};

const DEFAULT_CONFIG: &str = "warden.toml";

/// Explicit path must exist; the default path is optional.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<WardenConfig> {
    match path {
        Some(path) => WardenConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            WardenConfig::load(DEFAULT_CONFIG).with_context(|| format!("loading {}", DEFAULT_CONFIG))
        }
        None => {
            let config = WardenConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn open_warden(config: WardenConfig) -> anyhow::Result<Warden> {
    Warden::open(config).context("opening warden (is the master secret set?)")
}

fn open_guardian(config: &WardenConfig) -> anyhow::Result<SafetyGuardian> {
    let store = Store::open(config.store_path())?;
    let audit = AuditLog::open(store.db())?;
    Ok(SafetyGuardian::open(config.guardian_config(), &store, audit)?)
}

fn open_rollback(config: &WardenConfig) -> anyhow::Result<RollbackController> {
    let store = Store::open(config.store_path())?;
    let audit = AuditLog::open(store.db())?;
    Ok(RollbackController::open(
        config.rollback.clone(),
        store.tree(ROLLBACK_TREE)?,
        Arc::new(GitVersionControl::new(config.guardian.root.clone())),
        WorkspaceLock::new(),
    )?
    .with_audit(audit)
    .with_kill_switch(config.guardian.kill_switch()))
}

// =============================================================================
// Credentials and authorization
// =============================================================================

pub fn issue(config: WardenConfig, principal: &str, role: &str, ttl_secs: Option<u64>) -> anyhow::Result<ExitCode> {
    let warden = open_warden(config)?;
    if !warden.pipeline().roles().contains(role) {
        bail!("unknown role '{}' (known: {})", role, warden.pipeline().roles().names().join(", "));
    }
    let credentials = warden.pipeline().credentials();
    let ttl = ttl_secs.map_or_else(|| credentials.default_ttl(), Duration::from_secs);
    let token = credentials.issue(principal, role, ttl)?;
    info!(principal, role, ttl_secs = ttl.as_secs(), fingerprint = %token.fingerprint(), "token issued");
    println!("{}", token.as_str());
    Ok(ExitCode::SUCCESS)
}

pub fn revoke(config: WardenConfig, token: &str) -> anyhow::Result<ExitCode> {
    let warden = open_warden(config)?;
    let newly = warden.pipeline().credentials().revoke(token)?;
    warden.flush()?;
    println!("{}", if newly { "revoked" } else { "already revoked" });
    Ok(ExitCode::SUCCESS)
}

pub fn check(
    config: WardenConfig,
    principal: &str,
    role: &str,
    operation: &str,
    path: Option<String>,
) -> anyhow::Result<ExitCode> {
    let warden = open_warden(config)?;
    let ttl = warden.pipeline().credentials().default_ttl();
    let token = warden.pipeline().register_principal(principal, role, ttl)?;

    let mut request = OperationRequest::new(principal, token.as_str(), operation);
    if let Some(path) = path {
        request = request.with_path(path);
    }
    let decision = warden.pre_operation_check(&request);
    warden.pipeline().end_session(principal)?;

    print_json(&decision)?;
    Ok(status(decision.allowed))
}

// =============================================================================
// Integrity
// =============================================================================

pub fn register(config: WardenConfig, name: &str, path: &Path, trusted: bool) -> anyhow::Result<ExitCode> {
    let warden = open_warden(config)?;
    let entry = warden.register_component(name, path, trusted)?;
    print_json(&entry)?;
    Ok(ExitCode::SUCCESS)
}

pub fn verify(config: WardenConfig, name: Option<&str>, path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let warden = open_warden(config)?;
    match (name, path) {
        (Some(name), Some(path)) => {
            let decision = warden.check_component(name, path);
            print_json(&decision)?;
            Ok(status(decision.allowed))
        }
        _ => {
            let summary = warden.ledger().validate_all()?;
            print_json(&summary)?;
            Ok(status(summary.recommendation != Recommendation::Block))
        }
    }
}

pub fn seal(config: WardenConfig) -> anyhow::Result<ExitCode> {
    let guardian = open_guardian(&config)?;
    let record = guardian.seal()?;
    print_json(&record)?;
    Ok(ExitCode::SUCCESS)
}

pub fn audit(config: WardenConfig, events: usize) -> anyhow::Result<ExitCode> {
    let warden = open_warden(config)?;
    let report = warden.audit_system()?;
    print_json(&report)?;
    if events > 0 {
        print_json(&warden.audit_log().recent(events)?)?;
    }
    Ok(status(report.verdict == Health::Healthy))
}

// =============================================================================
// Kill switch
// =============================================================================

pub fn kill_switch_engage(config: WardenConfig, reason: &str) -> anyhow::Result<ExitCode> {
    let guardian = open_guardian(&config)?;
    let marker = guardian.engage_kill_switch(reason)?;
    println!("kill switch engaged: {}", marker.display());
    Ok(ExitCode::SUCCESS)
}

pub fn kill_switch_release(config: WardenConfig) -> anyhow::Result<ExitCode> {
    let guardian = open_guardian(&config)?;
    let removed = guardian.release_kill_switch()?;
    println!("kill switch released ({} marker(s) removed)", removed);
    if let Some(trigger) = guardian.kill_switch_status() {
        warn!(trigger = %trigger, "kill switch still engaged");
        println!("still engaged by {}", trigger);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn kill_switch_status(config: WardenConfig) -> anyhow::Result<ExitCode> {
    match config.guardian.kill_switch().status() {
        Some(trigger) => {
            println!("ENGAGED ({})", trigger);
            Ok(ExitCode::FAILURE)
        }
        None => {
            println!("released");
            Ok(ExitCode::SUCCESS)
        }
    }
}

// =============================================================================
// Rollback
// =============================================================================

pub fn rollback_status(config: WardenConfig) -> anyhow::Result<ExitCode> {
    let controller = open_rollback(&config)?;
    print_json(&controller.status())?;
    Ok(ExitCode::SUCCESS)
}

pub fn rollback_exit_recovery(config: WardenConfig) -> anyhow::Result<ExitCode> {
    let controller = open_rollback(&config)?;
    if controller.exit_recovery_mode()? {
        println!("recovery mode exited");
    } else {
        println!("not in recovery mode");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn rollback_record(
    config: WardenConfig,
    component: &str,
    passed: bool,
    details: &str,
) -> anyhow::Result<ExitCode> {
    let controller = open_rollback(&config)?;
    let outcome = controller.record_result(component, passed, details).await?;
    print_json(&outcome)?;
    match outcome.rollback {
        Some(RollbackOutcome::Failed { reason, .. }) => {
            eprintln!("ROLLBACK FAILED: {}", reason);
            Ok(ExitCode::FAILURE)
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

pub async fn rollback_mark_good(config: WardenConfig) -> anyhow::Result<ExitCode> {
    let controller = open_rollback(&config)?;
    let checkpoint = controller.mark_known_good().await?;
    println!("known-good checkpoint: {}", checkpoint);
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Sandbox
// =============================================================================

pub async fn sandbox_validate(config: WardenConfig) -> anyhow::Result<ExitCode> {
    let router = SandboxRouter::new(config.sandbox, WorkspaceLock::new())?;
    let report = router.validate().await;
    print_json(&report)?;
    Ok(status(report.availability == Availability::Available))
}

pub async fn run(
    config: WardenConfig,
    principal: &str,
    role: &str,
    profile: TaskProfile,
    component: Option<String>,
    timeout_secs: Option<u64>,
    command: &str,
) -> anyhow::Result<ExitCode> {
    let operation = config.guardian.execute_operation.clone();
    let warden = open_warden(config)?;
    let ttl = warden.pipeline().credentials().default_ttl();
    let token = warden.pipeline().register_principal(principal, role, ttl)?;

    let mut task = ExecutionTask::new(command).with_profile(profile);
    if let Some(secs) = timeout_secs {
        task = task.with_timeout(Duration::from_secs(secs));
    }
    task.component = component;

    let request = OperationRequest::new(principal, token.as_str(), &operation);
    let outcome = warden.execute(&request, &task).await?;
    warden.pipeline().end_session(principal)?;

    let Some(result) = outcome.result else {
        eprintln!("{}", outcome.decision.reason);
        return Ok(ExitCode::FAILURE);
    };

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if !result.sandboxed {
        warn!("command ran without sandbox isolation");
    }
    match outcome.flag {
        Some(DecisionCode::ExecutionTimeout) => eprintln!("timed out after {} ms", result.duration_ms),
        Some(DecisionCode::RollbackTriggered) => eprintln!("failure threshold reached: workspace rolled back"),
        _ => {}
    }
    if let Some(Some(RollbackOutcome::Failed { reason, .. })) = outcome.record.map(|r| r.rollback) {
        eprintln!("ROLLBACK FAILED: {}", reason);
    }

    Ok(ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1)))
}
