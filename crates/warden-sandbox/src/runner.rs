//! # Process Runner
//!
//! Builds the isolated command line for a mode and runs it with a hard
//! wall-clock timeout and bounded output capture.
//!
//! ## Isolation (bubblewrap)
//!
//! ```text
//! ReadOnly        --ro-bind / /  --dev /dev --proc /proc --tmpfs /tmp
//!                 --ro-bind CWD CWD --unshare-net --die-with-parent --chdir CWD
//! WorkspaceWrite  as ReadOnly, but --bind CWD CWD
//! FullAuto        as WorkspaceWrite, plus --unshare-pid --new-session
//! Elevated        --bind / /  --dev /dev --proc /proc --die-with-parent --chdir CWD
//! ```
//!
//! The command itself always runs as `sh -c <command>` inside the sandbox.
//!
//! ## Cleanup
//!
//! The child is the leader of a fresh process group. On timeout the whole
//! group receives SIGKILL, so grandchildren cannot outlive the run.
//! `kill_on_drop` covers cancellation of the awaiting future.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};
use crate::mode::ExecutionMode;

/// Exit code reported when a run is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Grace period for pipe readers after the process group is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Which external isolation tool wraps the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerSpec {
    /// bubblewrap with the per-mode argument sets above.
    Bubblewrap {
        /// Path or name of the `bwrap` binary.
        program: PathBuf,
    },
    /// Any wrapper taking the command as trailing arguments. The same
    /// arguments are used for every mode.
    Custom {
        /// Wrapper program.
        program: PathBuf,
        /// Arguments placed before `sh -c <command>`.
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for RunnerSpec {
    fn default() -> Self {
        Self::Bubblewrap {
            program: PathBuf::from("bwrap"),
        }
    }
}

impl RunnerSpec {
    /// The wrapper program.
    #[must_use]
    pub fn program(&self) -> &Path {
        match self {
            Self::Bubblewrap { program } | Self::Custom { program, .. } => program,
        }
    }

    /// Full argument vector (after the program) for running `command`.
    #[must_use]
    pub fn args(&self, mode: ExecutionMode, command: &str, cwd: &Path) -> Vec<String> {
        let mut args = match self {
            Self::Bubblewrap { .. } => bwrap_args(mode, cwd),
            Self::Custom { args, .. } => args.clone(),
        };
        args.extend(shell_args(command));
        args
    }
}

fn bwrap_args(mode: ExecutionMode, cwd: &Path) -> Vec<String> {
    let cwd = cwd.to_string_lossy().into_owned();
    let strs = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();

    let mut args = match mode {
        ExecutionMode::Elevated => strs(&["--bind", "/", "/", "--dev", "/dev", "--proc", "/proc"]),
        _ => strs(&["--ro-bind", "/", "/", "--dev", "/dev", "--proc", "/proc", "--tmpfs", "/tmp"]),
    };

    match mode {
        ExecutionMode::ReadOnly => args.extend(["--ro-bind".to_string(), cwd.clone(), cwd.clone()]),
        ExecutionMode::WorkspaceWrite | ExecutionMode::FullAuto => {
            args.extend(["--bind".to_string(), cwd.clone(), cwd.clone()]);
        }
        ExecutionMode::Elevated => {}
    }
    if mode != ExecutionMode::Elevated {
        args.push("--unshare-net".to_string());
    }
    if mode == ExecutionMode::FullAuto {
        args.extend(strs(&["--unshare-pid", "--new-session"]));
    }
    args.extend(["--die-with-parent".to_string(), "--chdir".to_string(), cwd]);
    args
}

/// `sh -c <command>`.
#[must_use]
pub fn shell_args(command: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), command.to_string()]
}

/// Raw outcome of one process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; 124 on timeout, 128 + signal if killed by a signal.
    pub exit_code: i32,
    /// Captured stdout, at most the configured cap.
    pub stdout: Vec<u8>,
    /// Captured stderr, at most the configured cap.
    pub stderr: Vec<u8>,
    /// Wall-clock time.
    pub duration: Duration,
    /// Killed for exceeding the timeout.
    pub timed_out: bool,
    /// Output was cut at the cap.
    pub truncated: bool,
}

/// Runs `program args` in `cwd` with a timeout and output cap.
///
/// # Errors
///
/// Returns `SandboxError::Spawn` if the program cannot start, or
/// `SandboxError::Io` if waiting on it fails.
pub async fn run_process(
    program: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<ProcessOutput> {
    let started = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
        program: program.display().to_string(),
        source,
    })?;
    let pid = child.id();
    debug!(program = %program.display(), pid, "process started");

    let stdout = tokio::spawn(read_capped(child.stdout.take(), max_output_bytes));
    let stderr = tokio::spawn(read_capped(child.stderr.take(), max_output_bytes));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (exit_code(status?), false),
        Err(_) => {
            warn!(pid, timeout_ms = timeout.as_millis() as u64, "process timed out, killing group");
            kill_group(pid);
            // Reap the leader so it does not linger as a zombie.
            let _ = child.kill().await;
            (TIMEOUT_EXIT_CODE, true)
        }
    };

    let (stdout, stdout_truncated) = collect(stdout).await;
    let (stderr, stderr_truncated) = collect(stderr).await;

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr,
        duration: started.elapsed(),
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
    })
}

/// Reads a pipe to EOF, keeping at most `cap` bytes. Keeps draining past
/// the cap so the writer never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, cap: usize) -> (Vec<u8>, bool) {
    let Some(mut pipe) = pipe else {
        return (Vec::new(), false);
    };
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];
    let mut truncated = false;

    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(buf.len());
                if n > room {
                    truncated = true;
                }
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (buf, truncated)
}

async fn collect(handle: tokio::task::JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => (Vec::new(), false),
        Err(_) => {
            // A descendant escaped the group and still holds the pipe.
            abort.abort();
            (Vec::new(), true)
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pid, error = %e, "killpg failed (group already gone?)");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
