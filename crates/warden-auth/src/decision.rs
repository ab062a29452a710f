//! Decision types for authorization results.
//!
//! Every check in Warden resolves to a [`Decision`]. A decision is plain
//! data: denials are values, not errors, so the caller always gets a
//! structured answer it can log and act on.

use serde::{Deserialize, Serialize};

use crate::roles::Budget;

/// Closed taxonomy of decision codes.
///
/// The code is rendered as the prefix of [`Decision::reason`], e.g.
/// `"AuthDenied: token revoked"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionCode {
    /// Token missing, malformed, forged, expired, revoked or mismatched.
    AuthDenied,
    /// Token role is not in the role registry.
    UnknownRole,
    /// Operation not permitted for the role.
    OperationDenied,
    /// Resource path matches none of the role's patterns.
    PathDenied,
    /// Soft deny: resubmit after out-of-band human approval.
    ApprovalRequired,
    /// Usage beyond the role's budget ceiling (advisory).
    BudgetExceeded,
    /// Component has never been registered with the ledger.
    IntegrityUnknown,
    /// Component content differs from its registered digest.
    IntegrityTampered,
    /// Registered component no longer exists on disk.
    IntegrityMissing,
    /// Isolation is unavailable and no degraded override is configured.
    SandboxUnavailable,
    /// Execution exceeded its wall-clock limit.
    ExecutionTimeout,
    /// Emergency stop is engaged.
    KillSwitchActive,
    /// Failure threshold reached and the workspace was reverted.
    RollbackTriggered,
    /// System is in recovery mode pending a human exit.
    RecoveryModeActive,
    /// An internal fault was converted into a denial.
    InternalError,
}

impl DecisionCode {
    /// Stable name of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthDenied => "AuthDenied",
            Self::UnknownRole => "UnknownRole",
            Self::OperationDenied => "OperationDenied",
            Self::PathDenied => "PathDenied",
            Self::ApprovalRequired => "ApprovalRequired",
            Self::BudgetExceeded => "BudgetExceeded",
            Self::IntegrityUnknown => "IntegrityUnknown",
            Self::IntegrityTampered => "IntegrityTampered",
            Self::IntegrityMissing => "IntegrityMissing",
            Self::SandboxUnavailable => "SandboxUnavailable",
            Self::ExecutionTimeout => "ExecutionTimeout",
            Self::KillSwitchActive => "KillSwitchActive",
            Self::RollbackTriggered => "RollbackTriggered",
            Self::RecoveryModeActive => "RecoveryModeActive",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for DecisionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages of the authorization state machine, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Request constructed, nothing checked yet.
    Received,
    /// Token validated and bound to the principal.
    TokenChecked,
    /// Role found in the registry.
    RoleResolved,
    /// Operation permitted for the role.
    OperationChecked,
    /// Resource path matched (or none supplied).
    PathChecked,
    /// Approval requirements evaluated.
    ApprovalChecked,
    /// Terminal state.
    Decided,
}

/// Budget ceilings attached to an allow decision for the caller's accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetHint {
    /// Role the ceilings came from.
    pub role: String,
    /// Maximum work units per session.
    pub max_units_per_session: u64,
    /// Maximum spend per day.
    pub max_cost_per_day: f64,
}

impl BudgetHint {
    /// Builds a hint from a role's budget.
    #[must_use]
    pub fn from_budget(role: &str, budget: &Budget) -> Self {
        Self {
            role: role.to_string(),
            max_units_per_session: budget.max_units_per_session,
            max_cost_per_day: budget.max_cost_per_day,
        }
    }

    /// Compares caller-tracked usage against the ceilings.
    ///
    /// Returns a `BudgetExceeded` denial when either ceiling is crossed.
    /// Enforcement stays with the caller; this only reports.
    #[must_use]
    pub fn check_usage(&self, units_used: u64, cost_today: f64) -> Option<Decision> {
        if units_used > self.max_units_per_session {
            return Some(Decision::deny(
                DecisionCode::BudgetExceeded,
                format!(
                    "{} of {} session units used by role '{}'",
                    units_used, self.max_units_per_session, self.role
                ),
                Stage::Decided,
            ));
        }
        if cost_today > self.max_cost_per_day {
            return Some(Decision::deny(
                DecisionCode::BudgetExceeded,
                format!(
                    "daily cost {:.2} exceeds {:.2} for role '{}'",
                    cost_today, self.max_cost_per_day, self.role
                ),
                Stage::Decided,
            ));
        }
        None
    }
}

/// Outcome of an authorization or safety check.
///
/// `requires_approval` separates a soft deny (resubmit after a human
/// approves) from a hard deny.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// `"<Code>: <detail>"` on denial, a short summary on allow.
    pub reason: String,
    /// Machine-readable code; `None` on allow.
    pub code: Option<DecisionCode>,
    /// Soft deny awaiting human approval.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,
    /// Role budget ceilings, attached on allow and approval decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_hint: Option<BudgetHint>,
    /// Last stage the request cleared.
    pub stage: Stage,
}

impl Decision {
    /// An allow decision.
    #[must_use]
    pub fn allow(detail: impl Into<String>, budget_hint: Option<BudgetHint>) -> Self {
        Self {
            allowed: true,
            reason: detail.into(),
            code: None,
            requires_approval: false,
            budget_hint,
            stage: Stage::Decided,
        }
    }

    /// A hard deny.
    #[must_use]
    pub fn deny(code: DecisionCode, detail: impl AsRef<str>, stage: Stage) -> Self {
        Self {
            allowed: false,
            reason: format!("{}: {}", code, detail.as_ref()),
            code: Some(code),
            requires_approval: false,
            budget_hint: None,
            stage,
        }
    }

    /// A soft deny that can be lifted by human approval.
    #[must_use]
    pub fn approval_required(
        detail: impl AsRef<str>,
        budget_hint: Option<BudgetHint>,
        stage: Stage,
    ) -> Self {
        Self {
            allowed: false,
            reason: format!("{}: {}", DecisionCode::ApprovalRequired, detail.as_ref()),
            code: Some(DecisionCode::ApprovalRequired),
            requires_approval: true,
            budget_hint,
            stage,
        }
    }

    /// Returns true for a hard deny (not allowed, no approval path).
    #[must_use]
    pub fn is_hard_deny(&self) -> bool {
        !self.allowed && !self.requires_approval
    }
}
