//! # Warden Rollback
//!
//! Feeds test and build outcomes into a per-component failure counter and
//! reverts the workspace to the last known-good checkpoint when a component
//! fails too many times in a row.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`RollbackController`] | Counters, threshold, rollback, recovery mode |
//! | [`VersionControl`] | Checkpoint operations (head, resolve, stash, checkout) |
//! | [`GitVersionControl`] | `git` implementation |
//! | [`RollbackState`] | Persisted counters, checkpoint and history |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_rollback::{GitVersionControl, RollbackConfig, RollbackController};
//! use warden_sandbox::WorkspaceLock;
//!
//! # async fn demo() -> warden_rollback::Result<()> {
//! let db = sled::open("/tmp/warden-db")?;
//! let controller = RollbackController::open(
//!     RollbackConfig::new().with_threshold(3),
//!     db.open_tree("rollback")?,
//!     Arc::new(GitVersionControl::new(".")),
//!     WorkspaceLock::new(),
//! )?;
//!
//! let outcome = controller.record_result("api", false, "test_login failed").await?;
//! if let Some(rollback) = outcome.rollback {
//!     println!("rollback: {:?}", rollback);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Notes
//!
//! - Recovery mode is only left through an explicit operator call
//! - Passing results never promote a checkpoint while in recovery mode
//! - Rollback failures are audited and never silently dropped

mod controller;
mod error;
mod state;
mod vcs;

pub use controller::{RecordOutcome, RiskAssessment, RollbackConfig, RollbackController, RollbackOutcome, RollbackStatus};
pub use error::{Result, RollbackError};
pub use state::{RollbackState, TestResult};
pub use vcs::{GitVersionControl, VersionControl};
