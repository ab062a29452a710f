//! # Warden Sandbox
//!
//! Chooses an isolation level for each command and runs it inside an
//! external sandbox (bubblewrap by default) with a hard timeout, capped
//! output and a global concurrency limit.
//!
//! ## Modes
//!
//! ```text
//!   TaskProfile ──select_mode──▶ ExecutionMode
//!
//!   needs network ─────────────▶ Elevated
//!   writes files ──────────────▶ WorkspaceWrite
//!   autonomous ────────────────▶ FullAuto
//!   otherwise ─────────────────▶ ReadOnly
//! ```
//!
//! Every mode except `ReadOnly` holds the shared [`WorkspaceLock`] for the
//! duration of the run. Rollback takes the same lock before touching the
//! working tree.
//!
//! ## Failure semantics
//!
//! A non-zero exit or a timeout is a normal [`ExecutionResult`]. An `Err`
//! means the command never ran: isolation is unavailable (and degraded mode
//! is off), the request is malformed, or spawning failed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden_sandbox::{ExecutionMode, ExecutionRequest, SandboxConfig, SandboxRouter, WorkspaceLock};
//!
//! # async fn demo() -> warden_sandbox::Result<()> {
//! let router = SandboxRouter::new(SandboxConfig::new(), WorkspaceLock::new())?;
//! router.validate().await;
//!
//! let result = router
//!     .execute(&ExecutionRequest::new("cargo test", ExecutionMode::WorkspaceWrite, "."))
//!     .await?;
//! println!("exit {} sandboxed={}", result.exit_code, result.sandboxed);
//! # Ok(())
//! # }
//! ```
//!
//! ## References
//!
//! - bubblewrap: <https://github.com/containers/bubblewrap>

mod error;
pub mod lock;
pub mod mode;
pub mod router;
pub mod runner;

pub use error::{Result, SandboxError};
pub use lock::{WorkspaceGuard, WorkspaceLock};
pub use mode::{select_mode, ExecutionMode, TaskProfile};
pub use router::{Availability, ExecutionRequest, ExecutionResult, SandboxConfig, SandboxRouter, SandboxValidation};
pub use runner::{RunnerSpec, TIMEOUT_EXIT_CODE};
