//! # Role Registry
//!
//! Static table of roles. Definitions are validated once at load time and
//! compiled into [`Role`] values; the registry is immutable afterwards and
//! shared by reference, so lookups take no lock.
//!
//! ## Built-in Roles
//!
//! | Role | Operations | Paths | Approval |
//! |------|-----------|-------|----------|
//! | `observer` | Read, List, Search | `**` | none |
//! | `reviewer` | Read, List, Search, Comment, Approve | `**` | none |
//! | `developer` | read ops + Write, Edit, Execute, Test, Commit, Deploy | `**/src/**`, `**/tests/**`, `**/docs/**` | Deploy |
//! | `admin` | `*` | `**` | Deploy, Delete |

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::decision::BudgetHint;
use crate::error::{AuthError, Result};
use crate::pattern::PathPattern;

/// Operation name that grants every operation.
pub const WILDCARD: &str = "*";

/// Budget ceilings for a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Work units allowed per session.
    pub max_units_per_session: u64,
    /// Spend allowed per day.
    pub max_cost_per_day: f64,
}

/// A role as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleDefinition {
    /// Unique role name.
    pub name: String,
    /// Permitted operations; may contain `*`.
    pub allowed_operations: Vec<String>,
    /// Glob patterns for resource paths.
    pub allowed_paths: Vec<String>,
    /// Operations that need human approval even when permitted.
    #[serde(default)]
    pub approval_required: Vec<String>,
    /// Budget ceilings.
    pub budget: Budget,
}

/// A validated, compiled role.
#[derive(Debug, Clone)]
pub struct Role {
    name: String,
    allowed_operations: BTreeSet<String>,
    path_patterns: Vec<PathPattern>,
    approval_required: BTreeSet<String>,
    budget: Budget,
}

impl Role {
    /// Validates and compiles a definition.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRole` for an empty name, no operations, no
    /// path patterns, blank operation names or a negative/non-finite cost
    /// ceiling, and `AuthError::InvalidPattern` for a bad glob.
    pub fn from_definition(def: &RoleDefinition) -> Result<Self> {
        let invalid = |reason: &str| AuthError::InvalidRole {
            role: def.name.clone(),
            reason: reason.to_string(),
        };

        if def.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if def.allowed_operations.is_empty() {
            return Err(invalid("no allowed operations"));
        }
        if def.allowed_paths.is_empty() {
            return Err(invalid("no allowed path patterns"));
        }
        if def
            .allowed_operations
            .iter()
            .chain(def.approval_required.iter())
            .any(|op| op.trim().is_empty())
        {
            return Err(invalid("blank operation name"));
        }
        if !def.budget.max_cost_per_day.is_finite() || def.budget.max_cost_per_day < 0.0 {
            return Err(invalid("max_cost_per_day must be a non-negative number"));
        }

        let path_patterns = def
            .allowed_paths
            .iter()
            .map(|p| PathPattern::compile(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: def.name.trim().to_string(),
            allowed_operations: def.allowed_operations.iter().map(|s| s.trim().to_string()).collect(),
            path_patterns,
            approval_required: def.approval_required.iter().map(|s| s.trim().to_string()).collect(),
            budget: def.budget.clone(),
        })
    }

    /// Role name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the operation is listed or the wildcard is present.
    #[must_use]
    pub fn permits_operation(&self, operation: &str) -> bool {
        self.allowed_operations.contains(WILDCARD) || self.allowed_operations.contains(operation)
    }

    /// True if the already-normalized path matches any pattern.
    #[must_use]
    pub fn permits_path(&self, normalized_path: &str) -> bool {
        self.path_patterns
            .iter()
            .any(|pattern| pattern.matches_normalized(normalized_path))
    }

    /// True if the operation must be approved by a human.
    #[must_use]
    pub fn requires_approval(&self, operation: &str) -> bool {
        self.approval_required.contains(operation)
    }

    /// Pattern sources, for denial messages.
    #[must_use]
    pub fn path_patterns(&self) -> Vec<&str> {
        self.path_patterns.iter().map(PathPattern::as_str).collect()
    }

    /// Budget ceilings.
    #[must_use]
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Budget hint for decisions.
    #[must_use]
    pub fn budget_hint(&self) -> BudgetHint {
        BudgetHint::from_budget(&self.name, &self.budget)
    }
}

/// Immutable name → role table.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: HashMap<String, Role>,
}

impl RoleRegistry {
    /// Builds a registry, rejecting the whole table on any bad entry.
    ///
    /// # Errors
    ///
    /// Returns the first validation error, or `AuthError::InvalidRole` for
    /// an empty table or duplicate names.
    pub fn from_definitions(definitions: &[RoleDefinition]) -> Result<Self> {
        if definitions.is_empty() {
            return Err(AuthError::InvalidRole {
                role: String::new(),
                reason: "role table is empty".to_string(),
            });
        }

        let mut roles = HashMap::with_capacity(definitions.len());
        for def in definitions {
            let role = Role::from_definition(def)?;
            let name = role.name().to_string();
            if roles.insert(name.clone(), role).is_some() {
                return Err(AuthError::InvalidRole {
                    role: name,
                    reason: "duplicate role name".to_string(),
                });
            }
        }

        Ok(Self { roles })
    }

    /// The built-in role table.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_definitions(&builtin_definitions()).expect("built-in role table is valid")
    }

    /// Looks up a role.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    /// True if the role exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    /// Sorted role names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.roles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// True if there are no roles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Definitions behind [`RoleRegistry::builtin`].
#[must_use]
pub fn builtin_definitions() -> Vec<RoleDefinition> {
    vec![
        RoleDefinition {
            name: "observer".to_string(),
            allowed_operations: strings(&["Read", "List", "Search"]),
            allowed_paths: strings(&["**"]),
            approval_required: Vec::new(),
            budget: Budget {
                max_units_per_session: 200,
                max_cost_per_day: 1.0,
            },
        },
        RoleDefinition {
            name: "reviewer".to_string(),
            allowed_operations: strings(&["Read", "List", "Search", "Comment", "Approve"]),
            allowed_paths: strings(&["**"]),
            approval_required: Vec::new(),
            budget: Budget {
                max_units_per_session: 500,
                max_cost_per_day: 5.0,
            },
        },
        RoleDefinition {
            name: "developer".to_string(),
            allowed_operations: strings(&[
                "Read", "List", "Search", "Write", "Edit", "Execute", "Test", "Commit", "Deploy",
            ]),
            allowed_paths: strings(&["**/src/**", "**/tests/**", "**/docs/**"]),
            approval_required: strings(&["Deploy"]),
            budget: Budget {
                max_units_per_session: 2_000,
                max_cost_per_day: 25.0,
            },
        },
        RoleDefinition {
            name: "admin".to_string(),
            allowed_operations: strings(&[WILDCARD]),
            allowed_paths: strings(&["**"]),
            approval_required: strings(&["Deploy", "Delete"]),
            budget: Budget {
                max_units_per_session: 10_000,
                max_cost_per_day: 100.0,
            },
        },
    ]
}
