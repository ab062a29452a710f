//! Router behaviour through the public API. A pass-through `env` runner
//! stands in for bubblewrap so these run on hosts without it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use warden_sandbox::{
    select_mode, Availability, ExecutionMode, ExecutionRequest, RunnerSpec, SandboxConfig, SandboxError,
    SandboxRouter, TaskProfile, WorkspaceLock,
};

fn passthrough() -> SandboxConfig {
    SandboxConfig::new().with_runner(RunnerSpec::Custom {
        program: PathBuf::from("env"),
        args: Vec::new(),
    })
}

#[tokio::test]
async fn test_selected_mode_runs_in_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let router = SandboxRouter::new(passthrough(), WorkspaceLock::new()).unwrap();
    let mode = select_mode(&TaskProfile::new().with_writes());
    assert_eq!(mode, ExecutionMode::WorkspaceWrite);

    let result = router
        .execute(&ExecutionRequest::new("echo data > out.txt && cat out.txt", mode, dir.path()))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.stdout, "data\n");
    assert!(dir.path().join("out.txt").exists());
}

#[tokio::test]
async fn test_non_zero_exit_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let router = SandboxRouter::new(passthrough(), WorkspaceLock::new()).unwrap();

    let result = router
        .execute(&ExecutionRequest::new("echo oops >&2; exit 3", ExecutionMode::ReadOnly, dir.path()))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stderr, "oops\n");
    assert!(result.sandboxed);
}

#[tokio::test]
async fn test_output_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let router =
        SandboxRouter::new(passthrough().with_max_output_bytes(64), WorkspaceLock::new()).unwrap();

    let result = router
        .execute(&ExecutionRequest::new("yes | head -n 1000", ExecutionMode::ReadOnly, dir.path()))
        .await
        .unwrap();

    assert!(result.truncated);
    assert!(result.stdout.len() <= 64);
}

#[tokio::test]
async fn test_writers_wait_for_workspace_lock() {
    let dir = tempfile::tempdir().unwrap();
    let lock = WorkspaceLock::new();
    let router = Arc::new(SandboxRouter::new(passthrough(), lock.clone()).unwrap());

    let guard = lock.acquire().await;
    let writer = {
        let router = Arc::clone(&router);
        let cwd = dir.path().to_path_buf();
        tokio::spawn(async move {
            router
                .execute(&ExecutionRequest::new("true", ExecutionMode::WorkspaceWrite, cwd))
                .await
        })
    };

    // Read-only runs are not blocked by the held lock.
    let reader = router
        .execute(&ExecutionRequest::new("true", ExecutionMode::ReadOnly, dir.path()))
        .await
        .unwrap();
    assert!(reader.success);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());

    drop(guard);
    let written = writer.await.unwrap().unwrap();
    assert!(written.success);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let router =
        Arc::new(SandboxRouter::new(passthrough().with_max_concurrent(1), WorkspaceLock::new()).unwrap());

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..2 {
        let router = Arc::clone(&router);
        let cwd = dir.path().to_path_buf();
        handles.push(tokio::spawn(async move {
            router
                .execute(&ExecutionRequest::new("sleep 0.3", ExecutionMode::ReadOnly, cwd))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }

    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test]
async fn test_missing_sandbox_fails_closed_until_degraded() {
    let dir = tempfile::tempdir().unwrap();
    let missing = RunnerSpec::Bubblewrap {
        program: PathBuf::from("/nonexistent/bwrap"),
    };

    let strict = SandboxRouter::new(SandboxConfig::new().with_runner(missing.clone()), WorkspaceLock::new()).unwrap();
    let report = strict.validate().await;
    assert!(!report.echo_ok);
    assert!(matches!(report.availability, Availability::Unavailable { .. }));
    let err = strict
        .execute(&ExecutionRequest::new("true", ExecutionMode::ReadOnly, dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Unavailable(_)));

    let degraded = SandboxRouter::new(
        SandboxConfig::new().with_runner(missing).with_allow_degraded(true),
        WorkspaceLock::new(),
    )
    .unwrap();
    let result = degraded
        .execute(&ExecutionRequest::new("echo ran", ExecutionMode::ReadOnly, dir.path()))
        .await
        .unwrap();
    assert!(!result.sandboxed);
    assert_eq!(result.stdout, "ran\n");
}

#[test]
fn test_config_from_json() {
    let config: SandboxConfig = serde_json::from_str(
        r#"{"runner": {"kind": "custom", "program": "env", "args": []}, "default_timeout": 5000, "allow_degraded": true}"#,
    )
    .unwrap();

    assert_eq!(config.default_timeout, Duration::from_secs(5));
    assert!(config.allow_degraded);
    assert_eq!(config.max_concurrent, 4);
}
