//! # Warden Integrity
//!
//! Tamper detection for trusted components, the safety guardian that
//! protects the guardrails themselves, and the durable audit trail both
//! write to.
//!
//! ## Threat Model
//!
//! | Threat | Description | Defense |
//! |--------|-------------|---------|
//! | Trojaned component | Trusted file or tree modified | Dual-digest ledger → `Tampered` |
//! | Guardrail removal | Safety files deleted | `Missing` + seal verification |
//! | Self-modification | Agent rewrites its own policy | Immutable write tier + violation log |
//! | Runaway agent | Agent keeps acting after things go wrong | Kill switch |
//! | Covering tracks | Evidence erased after the fact | Append-only sled audit log |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SAFETY GUARDIAN                        │
//! │                                                             │
//! │  ┌─────────────┐   ┌──────────────────┐   ┌─────────────┐  │
//! │  │ KILL SWITCH │   │  WRITE TIERS     │   │    SEAL     │  │
//! │  │ markers/env │   │ free / approval  │   │ baseline    │  │
//! │  │             │   │ / immutable      │   │ digest      │  │
//! │  └─────────────┘   └────────┬─────────┘   └──────┬──────┘  │
//! │                             │ violation          │         │
//! └─────────────────────────────┼────────────────────┼─────────┘
//!                               ▼                    ▼
//!  ┌──────────────────┐   ┌───────────┐   ┌──────────────────┐
//!  │ INTEGRITY LEDGER │──▶│ AUDIT LOG │◀──│ BASELINE LEDGER  │
//!  │ SHA-256 + BLAKE3 │   │  (sled)   │   │                  │
//!  └────────▲─────────┘   └───────────┘   └──────────────────┘
//!           │ every interval
//!     spawn_sweep
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use warden_integrity::{IntegrityLedger, ValidationResult};
//!
//! let ledger = IntegrityLedger::temporary().unwrap();
//! ledger.register("hooks", Path::new("./hooks"), true).unwrap();
//!
//! match ledger.validate("hooks", Path::new("./hooks")).unwrap() {
//!     ValidationResult::Verified { .. } => println!("hooks intact"),
//!     ValidationResult::Tampered { expected, actual } => {
//!         println!("hooks changed: {} -> {}", expected, actual);
//!     }
//!     other => println!("hooks: {}", other.label()),
//! }
//! ```
//!
//! ## References
//!
//! - NIST FIPS 180-4 - SHA-256
//! - BLAKE3 specification: <https://github.com/BLAKE3-team/BLAKE3-specs>

pub mod audit;
mod error;
pub mod guardian;
pub mod hashing;
pub mod killswitch;
pub mod ledger;
pub mod models;
pub mod storage;
pub mod sweep;

pub use audit::{AuditEvent, AuditLog, AuditRecord, ViolationRecord};
pub use error::{IntegrityError, Result};
pub use guardian::{GuardianConfig, Health, SafetyGuardian, SealRecord, SealStatus, SystemAudit, WriteTier};
pub use killswitch::{KillSwitch, KillSwitchTrigger};
pub use ledger::{IntegrityLedger, LedgerConfig};
pub use models::{ComponentKind, IntegrityEntry, Recommendation, ValidationResult, ValidationSummary};
pub use storage::Store;
pub use sweep::spawn_sweep;
