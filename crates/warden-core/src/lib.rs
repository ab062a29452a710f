//! # Warden Core
//!
//! Authorization, integrity and recovery for autonomous coding agents.
//! Orchestrates the Authorization Pipeline, Safety Guardian, Integrity
//! Ledger, Sandbox Router and Rollback Controller behind one facade.
//!
//! ## Threat Coverage
//!
//! | Layer | Component | Threats Blocked |
//! |-------|-----------|-----------------|
//! | Emergency | Kill switch | Runaway agent |
//! | Identity | Credential Service | Forged, expired, revoked tokens |
//! | Policy | Role Registry + Pipeline | Privilege escalation, path escape |
//! | Self-protection | Safety Guardian | Guardrail edits, self-modification |
//! | Supply chain | Integrity Ledger | Trojaned hooks and plugins |
//! | Execution | Sandbox Router | Workspace escape, exfiltration, hangs |
//! | Recovery | Rollback Controller | Repeatedly broken workspace |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          WARDEN CORE                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   request ──▶ kill switch ──▶ write tiers ──▶ pipeline          │
//! │                                                  │              │
//! │                                                  ▼              │
//! │                                          sandbox router         │
//! │                                                  │ pass/fail    │
//! │                                                  ▼              │
//! │   integrity ledger ◀── sweep             rollback controller    │
//! │          │                                       │              │
//! │          └──────────────▶ audit log ◀────────────┘              │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_core::{ExecutionTask, Warden, WardenConfig};
//! use warden_auth::OperationRequest;
//!
//! let warden = Warden::open(WardenConfig::load("warden.toml")?)?;
//! let token = warden.pipeline().register_principal("agent-7", "developer", ttl)?;
//!
//! let request = OperationRequest::new("agent-7", token.as_str(), "Write").with_path("src/lib.rs");
//! let decision = warden.pre_operation_check(&request);
//! if decision.allowed {
//!     apply_edit();
//! } else if decision.requires_approval {
//!     ask_a_human(decision.reason);
//! }
//! ```
//!
//! ## Security Notes
//!
//! - Checks run in order: kill switch → write tiers → pipeline → sandbox
//! - Any stage can veto; internal errors become denials
//! - Tamper, violation and rollback events are written to the audit log
//!   before they are returned
//! - Recovery mode is only left through an explicit operator call

mod config;
mod error;
mod warden;

pub use config::{CredentialsConfig, GuardianSection, IntegrityConfig, StoreConfig, UnknownPolicy, WardenConfig};
pub use error::{Result, WardenError};
pub use warden::{ExecutionOutcome, ExecutionTask, Warden, WardenAudit};

// Re-export component types for convenience
pub use warden_auth::{Decision, DecisionCode, MasterSecret, OperationRequest, Stage};
pub use warden_integrity::{Health, KillSwitchTrigger, SealStatus, ValidationResult};
pub use warden_rollback::{RecordOutcome, RiskAssessment, RollbackOutcome, RollbackStatus};
pub use warden_sandbox::{ExecutionMode, ExecutionResult, TaskProfile};
