//! Version control behind a trait so the controller can be tested without
//! a repository.
//!
//! All methods block. The controller calls them from
//! `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{Result, RollbackError};

/// Checkpoint operations the controller needs.
pub trait VersionControl: Send + Sync {
    /// Current checkpoint (commit id).
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Vcs` if the repository has no head.
    fn head(&self) -> Result<String>;

    /// Resolves a checkpoint reference to a full commit id.
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Vcs` if `rev` does not name a commit.
    fn resolve(&self, rev: &str) -> Result<String>;

    /// Saves uncommitted changes, returning the stash id if anything was
    /// saved.
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Vcs` if the stash could not be created.
    fn stash(&self, message: &str) -> Result<Option<String>>;

    /// Checks out `rev` in the working tree.
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Vcs` if the checkout fails.
    fn checkout(&self, rev: &str) -> Result<()>;
}

/// [`VersionControl`] over the `git` binary.
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    workdir: PathBuf,
    program: PathBuf,
}

impl GitVersionControl {
    /// Operates on the repository at `workdir` using `git` from `PATH`.
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            program: PathBuf::from("git"),
        }
    }

    /// Uses a specific git binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Repository working directory.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let command = format!("git {}", args.join(" "));
        debug!(command = %command, workdir = %self.workdir.display(), "running git");

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| RollbackError::Vcs {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RollbackError::Vcs {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl VersionControl for GitVersionControl {
    fn head(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"])
    }

    fn resolve(&self, rev: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", rev);
        self.git(&["rev-parse", "--verify", "--quiet", &spec])
    }

    fn stash(&self, message: &str) -> Result<Option<String>> {
        if self.git(&["status", "--porcelain"])?.is_empty() {
            return Ok(None);
        }
        self.git(&["stash", "push", "--include-untracked", "-m", message])?;
        self.git(&["rev-parse", "stash@{0}"]).map(Some)
    }

    fn checkout(&self, rev: &str) -> Result<()> {
        self.git(&["checkout", "--quiet", rev]).map(|_| ())
    }
}
