//! Execution modes and mode selection.
//!
//! | Mode | Filesystem | Network | Chosen when |
//! |------|-----------|---------|-------------|
//! | `ReadOnly` | read-only | blocked | default |
//! | `WorkspaceWrite` | cwd writable | blocked | task writes files |
//! | `FullAuto` | cwd writable, own pid namespace | blocked | task is autonomous |
//! | `Elevated` | writable | allowed | task needs network |
//!
//! `Elevated` is the highest-risk mode. Selecting it assumes the caller has
//! already accepted that risk out of band.

use serde::{Deserialize, Serialize};

/// Isolation level for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Read-only filesystem, no network.
    ReadOnly,
    /// Writable working directory, no network.
    WorkspaceWrite,
    /// Writable working directory, isolated pids, no network.
    FullAuto,
    /// Writable filesystem with network.
    Elevated,
}

impl ExecutionMode {
    /// Stable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::WorkspaceWrite => "workspace_write",
            Self::FullAuto => "full_auto",
            Self::Elevated => "elevated",
        }
    }

    /// True if the mode can modify the workspace and must hold the
    /// workspace lock.
    #[must_use]
    pub const fn writes_workspace(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "read_only" | "readonly" => Ok(Self::ReadOnly),
            "workspace_write" => Ok(Self::WorkspaceWrite),
            "full_auto" => Ok(Self::FullAuto),
            "elevated" => Ok(Self::Elevated),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

/// What a task needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProfile {
    /// Needs network access.
    #[serde(default)]
    pub requires_network: bool,
    /// Writes files in the workspace.
    #[serde(default)]
    pub writes_files: bool,
    /// Runs without a human in the loop.
    #[serde(default)]
    pub autonomous: bool,
}

impl TaskProfile {
    /// A read-only, supervised task.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requires_network: false,
            writes_files: false,
            autonomous: false,
        }
    }

    /// Marks the task as needing network.
    #[must_use]
    pub const fn with_network(mut self) -> Self {
        self.requires_network = true;
        self
    }

    /// Marks the task as writing files.
    #[must_use]
    pub const fn with_writes(mut self) -> Self {
        self.writes_files = true;
        self
    }

    /// Marks the task as autonomous.
    #[must_use]
    pub const fn with_autonomous(mut self) -> Self {
        self.autonomous = true;
        self
    }
}

/// Picks the mode for a task. First match wins: network, writes,
/// autonomous, otherwise read-only.
#[must_use]
pub const fn select_mode(profile: &TaskProfile) -> ExecutionMode {
    if profile.requires_network {
        ExecutionMode::Elevated
    } else if profile.writes_files {
        ExecutionMode::WorkspaceWrite
    } else if profile.autonomous {
        ExecutionMode::FullAuto
    } else {
        ExecutionMode::ReadOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_order() {
        assert_eq!(select_mode(&TaskProfile::new()), ExecutionMode::ReadOnly);
        assert_eq!(select_mode(&TaskProfile::new().with_autonomous()), ExecutionMode::FullAuto);
        assert_eq!(
            select_mode(&TaskProfile::new().with_autonomous().with_writes()),
            ExecutionMode::WorkspaceWrite
        );
        assert_eq!(
            select_mode(&TaskProfile::new().with_writes().with_network()),
            ExecutionMode::Elevated
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("read-only".parse::<ExecutionMode>(), Ok(ExecutionMode::ReadOnly));
        assert_eq!("FULL_AUTO".parse::<ExecutionMode>(), Ok(ExecutionMode::FullAuto));
        assert!("root".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_only_read_only_skips_lock() {
        assert!(!ExecutionMode::ReadOnly.writes_workspace());
        assert!(ExecutionMode::WorkspaceWrite.writes_workspace());
        assert!(ExecutionMode::FullAuto.writes_workspace());
        assert!(ExecutionMode::Elevated.writes_workspace());
    }
}
