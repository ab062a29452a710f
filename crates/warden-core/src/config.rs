//! Configuration types for Warden.
//!
//! Everything has a usable default, so an empty file (or no file) gives a
//! working fail-closed setup with the built-in role table.
//!
//! ```toml
//! [store]
//! path = ".warden/db"
//!
//! [credentials]
//! secret_env = "WARDEN_MASTER_SECRET"
//! default_ttl_secs = 28800
//!
//! [[roles]]
//! name = "ci"
//! allowed_operations = ["Read", "Execute"]
//! allowed_paths = ["**"]
//! budget = { max_units_per_session = 500, max_cost_per_day = 2.0 }
//!
//! [guardian]
//! root = "."
//! baseline = [".warden/policy.toml", "hooks"]
//! approval_patterns = ["Cargo.toml", ".github/**"]
//!
//! [integrity]
//! unknown_policy = "warn"
//!
//! [sandbox]
//! allow_degraded = false
//! runner = { kind = "bubblewrap", program = "bwrap" }
//!
//! [rollback]
//! threshold = 3
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_auth::{CredentialConfig, PathPattern, RoleDefinition, RoleRegistry};
use warden_integrity::hashing::DEFAULT_SKIP_DIRS;
use warden_integrity::killswitch::DEFAULT_ENV_VAR;
use warden_integrity::{GuardianConfig, KillSwitch, LedgerConfig};
use warden_rollback::RollbackConfig;
use warden_sandbox::SandboxConfig;

use crate::error::{Result, WardenError};

/// Configuration for the Warden facade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Persistence.
    pub store: StoreConfig,

    /// Credential Service settings.
    pub credentials: CredentialsConfig,

    /// Role table. Empty means the built-in table.
    pub roles: Vec<RoleDefinition>,

    /// Safety Guardian settings.
    pub guardian: GuardianSection,

    /// Integrity Ledger settings.
    pub integrity: IntegrityConfig,

    /// Sandbox Router settings.
    pub sandbox: SandboxConfig,

    /// Rollback Controller settings.
    pub rollback: RollbackConfig,
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sled database directory; relative paths resolve against the
    /// guardian root.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".warden/db"),
        }
    }
}

/// Credential Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Environment variable holding the master secret.
    pub secret_env: String,

    /// PBKDF2 iterations.
    pub kdf_iterations: u32,

    /// Default token lifetime in seconds.
    pub default_ttl_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let defaults = CredentialConfig::new();
        Self {
            secret_env: "WARDEN_MASTER_SECRET".to_string(),
            kdf_iterations: defaults.kdf_iterations,
            default_ttl_secs: defaults.default_ttl.as_secs(),
        }
    }
}

impl CredentialsConfig {
    /// Builder config for the Credential Service.
    #[must_use]
    pub fn credential_config(&self) -> CredentialConfig {
        CredentialConfig::new()
            .with_kdf_iterations(self.kdf_iterations)
            .with_default_ttl(Duration::from_secs(self.default_ttl_secs))
    }
}

/// Safety Guardian configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianSection {
    /// Workspace root.
    pub root: PathBuf,

    /// Security-critical paths, relative to `root` unless absolute.
    pub baseline: Vec<PathBuf>,

    /// Glob patterns whose writes need human approval.
    pub approval_patterns: Vec<String>,

    /// Operations subject to write-tier checks.
    pub mutating_operations: Vec<String>,

    /// Operation a request must name to run a command.
    pub execute_operation: String,

    /// Operation the role must also hold when a task writes files.
    pub write_operation: String,

    /// Kill switch environment flag.
    pub kill_switch_env: String,

    /// Kill switch marker files. `None` means `<root>/.warden/KILL_SWITCH`
    /// and `$HOME/.warden/KILL_SWITCH`.
    pub kill_switch_markers: Option<Vec<PathBuf>>,
}

impl Default for GuardianSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            baseline: Vec::new(),
            approval_patterns: Vec::new(),
            mutating_operations: ["Write", "Edit", "Create", "Delete", "Move", "Rename"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            execute_operation: "Execute".to_string(),
            write_operation: "Write".to_string(),
            kill_switch_env: DEFAULT_ENV_VAR.to_string(),
            kill_switch_markers: None,
        }
    }
}

impl GuardianSection {
    /// The configured kill switch.
    #[must_use]
    pub fn kill_switch(&self) -> KillSwitch {
        let markers = self
            .kill_switch_markers
            .clone()
            .unwrap_or_else(|| KillSwitch::for_root(&self.root).markers().to_vec());
        KillSwitch::new(markers, self.kill_switch_env.clone())
    }

    /// True if `operation` is subject to write-tier checks.
    #[must_use]
    pub fn is_mutating(&self, operation: &str) -> bool {
        self.mutating_operations.iter().any(|op| op.eq_ignore_ascii_case(operation))
    }
}

/// What to do with components the ledger has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    /// Allow silently.
    Allow,
    /// Allow, with an `IntegrityUnknown` warning in the reason.
    Warn,
    /// Deny with `IntegrityUnknown`.
    Deny,
}

/// Integrity Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Directory names skipped when hashing trees.
    pub skip_dirs: Vec<String>,

    /// Seconds between full sweeps; 0 disables the sweep.
    pub sweep_interval_secs: u64,

    /// Unknown-component policy for `check_component`.
    pub unknown_policy: UnknownPolicy,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| (*s).to_string()).collect(),
            sweep_interval_secs: 300,
            unknown_policy: UnknownPolicy::Warn,
        }
    }
}

impl IntegrityConfig {
    /// Ledger settings.
    #[must_use]
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig::new().with_skip_dirs(self.skip_dirs.clone())
    }

    /// Sweep period, if enabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl WardenConfig {
    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not match the
    /// schema, or fails [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| WardenError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects malformed entries before anything is opened.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: bad role table, bad glob pattern,
    /// empty operation list, or an out-of-range component setting.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.secret_env.trim().is_empty() {
            return Err(WardenError::Config("credentials.secret_env is empty".to_string()));
        }
        self.credentials.credential_config().validate()?;

        if !self.roles.is_empty() {
            RoleRegistry::from_definitions(&self.roles)?;
        }

        for pattern in &self.guardian.approval_patterns {
            PathPattern::compile(pattern)?;
        }
        let mut seen = HashSet::new();
        for op in &self.guardian.mutating_operations {
            if op.trim().is_empty() || !seen.insert(op.to_ascii_lowercase()) {
                return Err(WardenError::Config(format!(
                    "guardian.mutating_operations has an empty or duplicate entry '{}'",
                    op
                )));
            }
        }
        if self.guardian.execute_operation.trim().is_empty() {
            return Err(WardenError::Config("guardian.execute_operation is empty".to_string()));
        }
        if self.guardian.write_operation.trim().is_empty() {
            return Err(WardenError::Config("guardian.write_operation is empty".to_string()));
        }
        if self.guardian.kill_switch_env.trim().is_empty() {
            return Err(WardenError::Config("guardian.kill_switch_env is empty".to_string()));
        }

        self.sandbox.validate()?;
        self.rollback.validate()?;
        Ok(())
    }

    /// Database path, resolved against the guardian root.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            self.guardian.root.join(&self.store.path)
        }
    }

    /// Safety Guardian config.
    #[must_use]
    pub fn guardian_config(&self) -> GuardianConfig {
        let mut config = GuardianConfig::new(self.guardian.root.clone())
            .with_baseline(self.guardian.baseline.clone())
            .with_approval_patterns(self.guardian.approval_patterns.clone())
            .with_kill_switch(self.guardian.kill_switch());
        config.ledger = self.integrity.ledger_config();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.roles.is_empty());
        assert_eq!(config.rollback.threshold, 3);
        assert_eq!(config.integrity.unknown_policy, UnknownPolicy::Warn);
        assert!(!config.sandbox.allow_degraded);
        assert!(config.guardian.is_mutating("write"));
        assert!(!config.guardian.is_mutating("Read"));
        assert_eq!(config.guardian.execute_operation, "Execute");
        assert_eq!(config.guardian.write_operation, "Write");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: WardenConfig = toml::from_str(
            r#"
            [guardian]
            root = "/repo"
            approval_patterns = ["Cargo.toml"]

            [rollback]
            threshold = 5
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.rollback.threshold, 5);
        assert_eq!(config.rollback.history_capacity, 100);
        assert_eq!(config.store_path(), PathBuf::from("/repo/.warden/db"));
        assert_eq!(config.guardian.kill_switch().markers()[0], PathBuf::from("/repo/.warden/KILL_SWITCH"));
    }

    #[test]
    fn test_rejects_bad_entries() {
        let mut config = WardenConfig::default();
        config.rollback.threshold = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.credentials.kdf_iterations = 10;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.guardian.mutating_operations.push("WRITE".to_string());
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.guardian.execute_operation = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.guardian.write_operation = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_roles() {
        let config: std::result::Result<WardenConfig, _> = toml::from_str(
            r#"
            [[roles]]
            name = "ci"
            allowed_operations = ["Read"]
            allowed_paths = ["**"]
            budget = { max_units_per_session = 1, max_cost_per_day = 1.0 }

            [[roles]]
            name = "ci"
            allowed_operations = ["Read"]
            allowed_paths = ["**"]
            budget = { max_units_per_session = 1, max_cost_per_day = 1.0 }
            "#,
        );
        assert!(config.unwrap().validate().is_err());
    }

    #[test]
    fn test_unknown_field_in_role_rejected() {
        let parsed: std::result::Result<WardenConfig, _> = toml::from_str(
            r#"
            [[roles]]
            name = "ci"
            allowed_operations = ["Read"]
            allowed_paths = ["**"]
            superuser = true
            budget = { max_units_per_session = 1, max_cost_per_day = 1.0 }
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = WardenConfig::load("/nonexistent/warden.toml").unwrap_err();
        assert!(matches!(err, WardenError::Io { .. }));
    }
}
