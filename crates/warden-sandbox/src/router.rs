//! # Sandbox Router
//!
//! Front door for command execution: picks isolation, enforces ceilings and
//! normalizes the result.
//!
//! ## Threat Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Agent command escapes the workspace | External sandbox, per-mode binds |
//! | Data exfiltration | Network namespace unshared except in `Elevated` |
//! | Hung or runaway process | Hard timeout, process-group SIGKILL |
//! | Output flooding | Per-stream byte cap |
//! | Fork bomb of executions | Global concurrency semaphore |
//! | Silent loss of isolation | Fail closed unless degraded mode is configured |
//! | Unnoticed bypass | `sandboxed` flag on every result, bypass logged |
//!
//! ## Flow
//!
//! ```text
//! ExecutionRequest
//!       │
//!       ├─ trusted && bypass ───────────────▶ direct `sh -c`   (sandboxed=false)
//!       │
//!       ├─ sandbox unavailable ─┬─ degraded ─▶ direct `sh -c`   (sandboxed=false)
//!       │                       └─ otherwise ─▶ Err(Unavailable)
//!       │
//!       └─ sandbox runner ──────────────────▶ ExecutionResult (sandboxed=true)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::lock::WorkspaceLock;
use crate::mode::ExecutionMode;
use crate::runner::{run_process, shell_args, ProcessOutput, RunnerSpec};

/// Output the self-check expects from the benign command.
const SELF_TEST_MARKER: &str = "warden-sandbox-ok";

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// External isolation tool.
    pub runner: RunnerSpec,
    /// Timeout when a request does not give one.
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// Byte cap per output stream.
    pub max_output_bytes: usize,
    /// Maximum simultaneous executions.
    pub max_concurrent: usize,
    /// Run unsandboxed when isolation is unavailable instead of refusing.
    pub allow_degraded: bool,
    /// Command that must fail inside the sandbox for network isolation to
    /// count as working.
    pub network_check: String,
}

impl SandboxConfig {
    /// Defaults: bubblewrap, 2 minute timeout, 1 MiB per stream, 4 slots,
    /// fail closed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runner: RunnerSpec::default(),
            default_timeout: Duration::from_secs(120),
            max_output_bytes: 1024 * 1024,
            max_concurrent: 4,
            allow_degraded: false,
            network_check: "ping -c 1 -W 1 1.1.1.1".to_string(),
        }
    }

    /// Sets the runner.
    #[must_use]
    pub fn with_runner(mut self, runner: RunnerSpec) -> Self {
        self.runner = runner;
        self
    }

    /// Sets the default timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the output cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Sets the concurrency cap.
    #[must_use]
    pub fn with_max_concurrent(mut self, slots: usize) -> Self {
        self.max_concurrent = slots;
        self
    }

    /// Allows unsandboxed execution when isolation is unavailable.
    #[must_use]
    pub fn with_allow_degraded(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }

    /// Sets the network check command.
    #[must_use]
    pub fn with_network_check(mut self, command: impl Into<String>) -> Self {
        self.network_check = command.into();
        self
    }

    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Config` for a zero timeout, cap or slot count.
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(SandboxError::Config("default_timeout must be non-zero".to_string()));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config("max_output_bytes must be non-zero".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(SandboxError::Config("max_concurrent must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Shell command line.
    pub command: String,
    /// Isolation mode.
    pub mode: ExecutionMode,
    /// Wall-clock limit; the router default if `None`.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Caller vouches for the command.
    #[serde(default)]
    pub trusted: bool,
    /// Caller asks to skip isolation. Honoured only with `trusted`.
    #[serde(default)]
    pub bypass: bool,
}

impl ExecutionRequest {
    /// A sandboxed request.
    #[must_use]
    pub fn new(command: impl Into<String>, mode: ExecutionMode, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            mode,
            timeout: None,
            cwd: cwd.into(),
            trusted: false,
            bypass: false,
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declares the command trusted and asks to run it without isolation.
    #[must_use]
    pub fn trusted_bypass(mut self) -> Self {
        self.trusted = true;
        self.bypass = true;
        self
    }
}

/// Normalized execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code 0 and no timeout.
    pub success: bool,
    /// Exit code; 124 on timeout.
    pub exit_code: i32,
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Whether isolation was used.
    pub sandboxed: bool,
    /// Requested mode.
    pub mode: ExecutionMode,
    /// Killed for exceeding the timeout.
    pub timed_out: bool,
    /// Output was truncated at the cap.
    pub truncated: bool,
}

impl ExecutionResult {
    fn from_output(output: ProcessOutput, sandboxed: bool, mode: ExecutionMode) -> Self {
        Self {
            success: output.exit_code == 0 && !output.timed_out,
            exit_code: output.exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
            sandboxed,
            mode,
            timed_out: output.timed_out,
            truncated: output.truncated,
        }
    }
}

/// Whether the external sandbox works on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    /// Not checked yet.
    Unknown,
    /// Self-check passed.
    Available,
    /// Self-check failed.
    Unavailable {
        /// Why.
        reason: String,
    },
}

/// Report from [`SandboxRouter::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxValidation {
    /// Resulting availability.
    pub availability: Availability,
    /// The benign command produced the expected output.
    pub echo_ok: bool,
    /// The network check failed inside the sandbox.
    pub network_blocked: bool,
}

/// Selects isolation and runs commands.
pub struct SandboxRouter {
    config: SandboxConfig,
    slots: Arc<Semaphore>,
    availability: RwLock<Availability>,
    workspace: WorkspaceLock,
}

impl SandboxRouter {
    /// Creates a router sharing `workspace` with other writers.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Config` if `config` is out of range.
    pub fn new(config: SandboxConfig, workspace: WorkspaceLock) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            availability: RwLock::new(Availability::Unknown),
            workspace,
        })
    }

    /// Current availability.
    #[must_use]
    pub fn availability(&self) -> Availability {
        self.availability.read().clone()
    }

    /// The shared workspace lock.
    #[must_use]
    pub fn workspace_lock(&self) -> &WorkspaceLock {
        &self.workspace
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs a command.
    ///
    /// Non-zero exits and timeouts are returned as data.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Unavailable` when isolation is missing and
    /// degraded mode is off, `SandboxError::InvalidRequest` for an empty
    /// command or missing cwd, or a spawn error for the direct path.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        if request.command.trim().is_empty() {
            return Err(SandboxError::InvalidRequest("command is empty".to_string()));
        }
        if !request.cwd.is_dir() {
            return Err(SandboxError::InvalidRequest(format!(
                "cwd {} is not a directory",
                request.cwd.display()
            )));
        }

        let _slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Unavailable("execution slots closed".to_string()))?;
        let _workspace = if request.mode.writes_workspace() {
            Some(self.workspace.acquire().await)
        } else {
            None
        };

        if request.bypass {
            if request.trusted {
                info!(command = %request.command, mode = %request.mode, "sandbox bypass for trusted command");
                return self.run_direct(request).await;
            }
            warn!(command = %request.command, "bypass requested without trust, running sandboxed");
        }

        if let Availability::Unavailable { reason } = self.availability() {
            return self.degrade(request, reason).await;
        }

        let program = self.config.runner.program().to_path_buf();
        let args = self.config.runner.args(request.mode, &request.command, &request.cwd);
        match run_process(
            &program,
            &args,
            &request.cwd,
            self.timeout(request),
            self.config.max_output_bytes,
        )
        .await
        {
            Ok(output) => {
                debug!(exit_code = output.exit_code, mode = %request.mode, "sandboxed run finished");
                Ok(ExecutionResult::from_output(output, true, request.mode))
            }
            Err(SandboxError::Spawn { program, source }) => {
                let reason = format!("cannot start {}: {}", program, source);
                *self.availability.write() = Availability::Unavailable { reason: reason.clone() };
                self.degrade(request, reason).await
            }
            Err(e) => Err(e),
        }
    }

    /// End-to-end self-check: a benign command must produce the expected
    /// output and the network check must fail. Updates availability.
    pub async fn validate(&self) -> SandboxValidation {
        let cwd = std::env::temp_dir();
        let program = self.config.runner.program().to_path_buf();
        let timeout = Duration::from_secs(10);
        let cap = 4096;

        let echo = run_process(
            &program,
            &self.config.runner.args(ExecutionMode::ReadOnly, &format!("echo {}", SELF_TEST_MARKER), &cwd),
            &cwd,
            timeout,
            cap,
        )
        .await;
        let echo_ok = matches!(&echo, Ok(out) if out.exit_code == 0 && String::from_utf8_lossy(&out.stdout).trim() == SELF_TEST_MARKER);

        let network_blocked = if echo_ok {
            match run_process(
                &program,
                &self.config.runner.args(ExecutionMode::ReadOnly, &self.config.network_check, &cwd),
                &cwd,
                timeout,
                cap,
            )
            .await
            {
                Ok(out) => out.exit_code != 0,
                Err(_) => false,
            }
        } else {
            false
        };

        let availability = match (&echo, echo_ok, network_blocked) {
            (_, true, true) => Availability::Available,
            (_, true, false) => Availability::Unavailable {
                reason: "network check succeeded inside the sandbox".to_string(),
            },
            (Err(e), false, _) => Availability::Unavailable { reason: e.to_string() },
            (Ok(out), false, _) => Availability::Unavailable {
                reason: format!(
                    "self-check exited {} with unexpected output: {}",
                    out.exit_code,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            },
        };

        match &availability {
            Availability::Available => info!("sandbox self-check passed"),
            Availability::Unavailable { reason } => warn!(reason = %reason, "sandbox self-check failed"),
            Availability::Unknown => {}
        }
        *self.availability.write() = availability.clone();

        SandboxValidation {
            availability,
            echo_ok,
            network_blocked,
        }
    }

    async fn degrade(&self, request: &ExecutionRequest, reason: String) -> Result<ExecutionResult> {
        if self.config.allow_degraded {
            warn!(reason = %reason, command = %request.command, "sandbox unavailable, running degraded");
            self.run_direct(request).await
        } else {
            warn!(reason = %reason, command = %request.command, "sandbox unavailable, refusing");
            Err(SandboxError::Unavailable(reason))
        }
    }

    async fn run_direct(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let args = shell_args(&request.command);
        let (program, rest) = args.split_first().ok_or_else(|| SandboxError::InvalidRequest("empty argv".to_string()))?;
        let output = run_process(
            std::path::Path::new(program),
            rest,
            &request.cwd,
            self.timeout(request),
            self.config.max_output_bytes,
        )
        .await?;
        Ok(ExecutionResult::from_output(output, false, request.mode))
    }

    fn timeout(&self, request: &ExecutionRequest) -> Duration {
        request.timeout.unwrap_or(self.config.default_timeout)
    }
}

impl std::fmt::Debug for SandboxRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRouter")
            .field("runner", &self.config.runner.program())
            .field("availability", &*self.availability.read())
            .field("free_slots", &self.slots.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough() -> SandboxConfig {
        SandboxConfig::new().with_runner(RunnerSpec::Custom {
            program: PathBuf::from("env"),
            args: Vec::new(),
        })
    }

    fn router(config: SandboxConfig) -> SandboxRouter {
        SandboxRouter::new(config, WorkspaceLock::new()).unwrap()
    }

    #[tokio::test]
    async fn test_sandboxed_run_reports_sandboxed() {
        let dir = tempfile::tempdir().unwrap();
        let result = router(passthrough())
            .execute(&ExecutionRequest::new("echo hi", ExecutionMode::ReadOnly, dir.path()))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.sandboxed);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.mode, ExecutionMode::ReadOnly);
    }

    #[tokio::test]
    async fn test_trusted_bypass_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(passthrough());

        let bypassed = r
            .execute(&ExecutionRequest::new("true", ExecutionMode::ReadOnly, dir.path()).trusted_bypass())
            .await
            .unwrap();
        assert!(!bypassed.sandboxed);

        let mut untrusted = ExecutionRequest::new("true", ExecutionMode::ReadOnly, dir.path());
        untrusted.bypass = true;
        assert!(r.execute(&untrusted).await.unwrap().sandboxed);
    }

    #[tokio::test]
    async fn test_fail_closed_when_runner_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::new().with_runner(RunnerSpec::Bubblewrap {
            program: PathBuf::from("/nonexistent/bwrap"),
        });
        let r = router(config);

        let err = r
            .execute(&ExecutionRequest::new("echo hi", ExecutionMode::ReadOnly, dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable(_)));
        assert!(matches!(r.availability(), Availability::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_degraded_override() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::new()
            .with_runner(RunnerSpec::Bubblewrap {
                program: PathBuf::from("/nonexistent/bwrap"),
            })
            .with_allow_degraded(true);

        let result = router(config)
            .execute(&ExecutionRequest::new("echo hi", ExecutionMode::ReadOnly, dir.path()))
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.sandboxed);
    }

    #[tokio::test]
    async fn test_timeout_is_data() {
        let dir = tempfile::tempdir().unwrap();
        let result = router(passthrough())
            .execute(
                &ExecutionRequest::new("sleep 10", ExecutionMode::ReadOnly, dir.path())
                    .with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, crate::runner::TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_validate_detects_open_network() {
        let r = router(passthrough().with_network_check("true"));
        let report = r.validate().await;
        assert!(report.echo_ok);
        assert!(!report.network_blocked);
        assert!(matches!(report.availability, Availability::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_validate_passes() {
        let r = router(passthrough().with_network_check("exit 1"));
        let report = r.validate().await;
        assert_eq!(report.availability, Availability::Available);
        assert_eq!(r.availability(), Availability::Available);
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let r = router(passthrough());
        assert!(matches!(
            r.execute(&ExecutionRequest::new("  ", ExecutionMode::ReadOnly, "/")).await,
            Err(SandboxError::InvalidRequest(_))
        ));
        assert!(matches!(
            r.execute(&ExecutionRequest::new("true", ExecutionMode::ReadOnly, "/nonexistent/dir")).await,
            Err(SandboxError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(SandboxConfig::new().validate().is_ok());
        assert!(SandboxConfig::new().with_max_concurrent(0).validate().is_err());
        assert!(SandboxConfig::new().with_default_timeout(Duration::ZERO).validate().is_err());
    }
}
