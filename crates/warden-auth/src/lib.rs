//! # Warden Auth
//!
//! Identity and authorization for autonomous agents.
//!
//! ## Components
//!
//! - [`CredentialService`]: sealed, expiring, revocable tokens
//! - [`RoleRegistry`]: validated role table with operation and path grants
//! - [`AuthorizationPipeline`]: per-request state machine producing a
//!   [`Decision`]
//!
//! ## Architecture
//!
//! ```text
//! OperationRequest
//!        │
//!        ▼
//! ┌──────────────────────┐   full_validate   ┌───────────────────┐
//! │ AuthorizationPipeline │ ───────────────▶ │ CredentialService │
//! │                      │                   │  + RevocationList │
//! │  principals table    │   role lookup     └───────────────────┘
//! │                      │ ───────────────▶ ┌───────────────────┐
//! └──────────┬───────────┘                   │   RoleRegistry    │
//!            │                               └───────────────────┘
//!            ▼
//!        Decision { allowed, reason, code, requires_approval, budget_hint }
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_auth::{
//!     AuthorizationPipeline, CredentialConfig, CredentialService, MasterSecret,
//!     OperationRequest, RevocationList, RoleRegistry,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let secret = MasterSecret::from_env("WARDEN_MASTER_SECRET")?;
//! let credentials = CredentialService::new(secret, CredentialConfig::new(), RevocationList::temporary()?)?;
//! let pipeline = AuthorizationPipeline::new(Arc::new(credentials), Arc::new(RoleRegistry::builtin()));
//!
//! let token = pipeline.register_principal("agent-7", "developer", Duration::from_secs(3600))?;
//! let request = OperationRequest::new("agent-7", token.as_str(), "Write").with_path("/repo/src/lib.rs");
//! assert!(pipeline.enforce(&request).allowed);
//! # Ok(())
//! # }
//! ```

pub mod credential;
pub mod decision;
mod error;
pub mod pattern;
pub mod pipeline;
pub mod revocation;
pub mod roles;

pub use credential::{
    CredentialConfig, CredentialService, MasterSecret, RefreshError, Token, TokenPayload, TokenRejection,
};
pub use decision::{BudgetHint, Decision, DecisionCode, Stage};
pub use error::{AuthError, Result};
pub use pattern::{match_path, normalize_path, PathPattern};
pub use pipeline::{AuthorizationPipeline, OperationRequest, Principal};
pub use revocation::{token_digest, RevocationList, TokenDigest};
pub use roles::{Budget, Role, RoleDefinition, RoleRegistry};
