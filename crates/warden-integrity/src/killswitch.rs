//! # Kill Switch
//!
//! Operator-controlled emergency stop. While engaged, every operation is
//! denied regardless of role.
//!
//! ## Triggers
//!
//! | Trigger | Default |
//! |---------|---------|
//! | Marker file | `<root>/.warden/KILL_SWITCH`, `$HOME/.warden/KILL_SWITCH` |
//! | Environment flag | `WARDEN_KILL_SWITCH` set to `1`, `true`, `yes` or `on` |
//!
//! Normal operation never creates a marker. Only [`KillSwitch::engage`]
//! (an explicit operator action, or the rollback controller's emergency
//! path) does.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{IntegrityError, Result};

/// Default environment flag.
pub const DEFAULT_ENV_VAR: &str = "WARDEN_KILL_SWITCH";

/// Marker file name.
pub const MARKER_NAME: &str = "KILL_SWITCH";

/// Directory holding warden state under a root or home directory.
pub const STATE_DIR: &str = ".warden";

/// Why the kill switch reads as engaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum KillSwitchTrigger {
    /// A marker file exists.
    Marker {
        /// Marker path.
        path: PathBuf,
    },
    /// The environment flag is set.
    Environment {
        /// Variable name.
        var: String,
    },
}

impl std::fmt::Display for KillSwitchTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Marker { path } => write!(f, "marker {}", path.display()),
            Self::Environment { var } => write!(f, "environment flag {}", var),
        }
    }
}

/// Checks and toggles the emergency stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitch {
    markers: Vec<PathBuf>,
    env_var: String,
}

impl KillSwitch {
    /// Markers under `root` and `$HOME`, default environment flag.
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        let mut markers = vec![root.join(STATE_DIR).join(MARKER_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            markers.push(PathBuf::from(home).join(STATE_DIR).join(MARKER_NAME));
        }
        Self {
            markers,
            env_var: DEFAULT_ENV_VAR.to_string(),
        }
    }

    /// Explicit marker list and flag name.
    #[must_use]
    pub fn new(markers: Vec<PathBuf>, env_var: impl Into<String>) -> Self {
        Self {
            markers,
            env_var: env_var.into(),
        }
    }

    /// Marker paths checked, in priority order.
    #[must_use]
    pub fn markers(&self) -> &[PathBuf] {
        &self.markers
    }

    /// Environment flag name.
    #[must_use]
    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    /// The first active trigger, if any.
    #[must_use]
    pub fn status(&self) -> Option<KillSwitchTrigger> {
        if let Some(path) = self.markers.iter().find(|path| path.exists()) {
            return Some(KillSwitchTrigger::Marker { path: path.clone() });
        }
        let flagged = std::env::var(&self.env_var)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        flagged.then(|| KillSwitchTrigger::Environment {
            var: self.env_var.clone(),
        })
    }

    /// True if any trigger is active.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.status().is_some()
    }

    /// Writes the primary marker with `reason` and a timestamp.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Config` if no marker path is configured, or
    /// `IntegrityError::Io` if the marker cannot be written.
    pub fn engage(&self, reason: &str) -> Result<PathBuf> {
        let marker = self
            .markers
            .first()
            .ok_or_else(|| IntegrityError::Config("no kill switch marker configured".to_string()))?;
        if let Some(parent) = marker.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IntegrityError::io(parent, e))?;
        }
        let body = format!("{}\n{}\n", Utc::now().to_rfc3339(), reason);
        std::fs::write(marker, body).map_err(|e| IntegrityError::io(marker, e))?;

        error!(marker = %marker.display(), reason, "KILL SWITCH ENGAGED");
        Ok(marker.clone())
    }

    /// Removes every marker. Returns how many were removed.
    ///
    /// The environment flag cannot be cleared from here; a warning is logged
    /// if it is still set.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Io` if an existing marker cannot be removed.
    pub fn release(&self) -> Result<usize> {
        let mut removed = 0;
        for marker in &self.markers {
            match std::fs::remove_file(marker) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(IntegrityError::io(marker, e)),
            }
        }

        if let Some(KillSwitchTrigger::Environment { var }) = self.status() {
            warn!(var = %var, "markers removed but environment flag still engages the kill switch");
        } else {
            info!(removed, "kill switch released");
        }
        Ok(removed)
    }
}
