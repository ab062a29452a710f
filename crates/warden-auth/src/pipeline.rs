//! # Authorization Pipeline
//!
//! Turns an [`OperationRequest`] into a [`Decision`] by walking a fixed
//! state machine:
//!
//! ```text
//! RECEIVED ─▶ TOKEN_CHECKED ─▶ ROLE_RESOLVED ─▶ OPERATION_CHECKED
//!                                                      │
//!            DECIDED ◀─ APPROVAL_CHECKED ◀─ PATH_CHECKED ◀┘
//! ```
//!
//! Each stage short-circuits to a deny on the first failure. Only a request
//! that clears every stage is allowed.
//!
//! ## Security Notes
//!
//! - Fail-closed: every failure path returns `allowed = false`
//! - Unknown principals are rejected before any cryptography runs
//! - The token must be the principal's *current* token (digest match), so a
//!   superseded token stops working as soon as a new one is issued
//! - Requests are expected to finish well under [`LATENCY_BUDGET`]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::credential::{fingerprint, CredentialService, Token, TokenPayload};
use crate::decision::{Decision, DecisionCode, Stage};
use crate::error::{AuthError, Result};
use crate::pattern::normalize_path;
use crate::revocation::{token_digest, TokenDigest};
use crate::roles::{Role, RoleRegistry};

/// Soft latency ceiling for a single authorization.
pub const LATENCY_BUDGET: Duration = Duration::from_millis(100);

/// A request to perform an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Who is asking.
    pub principal_id: String,
    /// Opaque token presented by the principal.
    pub token: String,
    /// Operation name, e.g. `Read`, `Write`, `Execute`.
    pub operation: String,
    /// Resource the operation targets, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,
}

impl OperationRequest {
    /// A request without a resource path.
    #[must_use]
    pub fn new(principal_id: impl Into<String>, token: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            token: token.into(),
            operation: operation.into(),
            resource_path: None,
        }
    }

    /// Sets the resource path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.resource_path = Some(path.into());
        self
    }
}

/// A registered identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier.
    pub id: String,
    /// Current role.
    pub role: String,
    /// Hex SHA-256 digest of the current token.
    pub token_hash: String,
    /// When the session started.
    pub registered_at: DateTime<Utc>,
}

/// The request-time authorization pipeline.
///
/// Holds no decision state of its own; it delegates to the credential
/// service and role registry and keeps only the live principal table.
pub struct AuthorizationPipeline {
    credentials: Arc<CredentialService>,
    roles: Arc<RoleRegistry>,
    principals: RwLock<HashMap<String, Principal>>,
}

impl AuthorizationPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(credentials: Arc<CredentialService>, roles: Arc<RoleRegistry>) -> Self {
        Self {
            credentials,
            roles,
            principals: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a session: issues a token and records the principal.
    ///
    /// Re-registering an existing principal revokes its previous token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnknownRole` if the role is not in the registry,
    /// or any issuing/revocation error.
    pub fn register_principal(&self, principal_id: &str, role: &str, ttl: Duration) -> Result<Token> {
        if !self.roles.contains(role) {
            return Err(AuthError::UnknownRole(role.to_string()));
        }

        let token = self.credentials.issue(principal_id, role, ttl)?;
        let principal = Principal {
            id: principal_id.to_string(),
            role: role.to_string(),
            token_hash: hex::encode(token_digest(token.as_str())),
            registered_at: Utc::now(),
        };

        let previous = self.principals.write().insert(principal_id.to_string(), principal);
        if let Some(previous) = previous {
            self.revoke_hash(&previous.token_hash)?;
        }

        info!(principal = principal_id, role, "principal registered");
        Ok(token)
    }

    /// Moves a principal to another role and issues a replacement token.
    ///
    /// The previous token is revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnknownPrincipal` or `AuthError::UnknownRole`.
    pub fn reassign_role(&self, principal_id: &str, role: &str, ttl: Duration) -> Result<Token> {
        if !self.roles.contains(role) {
            return Err(AuthError::UnknownRole(role.to_string()));
        }
        if !self.principals.read().contains_key(principal_id) {
            return Err(AuthError::UnknownPrincipal(principal_id.to_string()));
        }

        let token = self.credentials.issue(principal_id, role, ttl)?;
        let previous_hash = {
            let mut principals = self.principals.write();
            let principal = principals
                .get_mut(principal_id)
                .ok_or_else(|| AuthError::UnknownPrincipal(principal_id.to_string()))?;
            principal.role = role.to_string();
            std::mem::replace(&mut principal.token_hash, hex::encode(token_digest(token.as_str())))
        };
        self.revoke_hash(&previous_hash)?;

        info!(principal = principal_id, role, "role reassigned");
        Ok(token)
    }

    /// Ends a session: revokes the current token and forgets the principal.
    ///
    /// Returns `false` if the principal was not registered.
    ///
    /// # Errors
    ///
    /// Returns a revocation store error.
    pub fn end_session(&self, principal_id: &str) -> Result<bool> {
        let removed = self.principals.write().remove(principal_id);
        match removed {
            Some(principal) => {
                self.revoke_hash(&principal.token_hash)?;
                info!(principal = principal_id, "session ended");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Looks up a principal.
    #[must_use]
    pub fn principal(&self, principal_id: &str) -> Option<Principal> {
        self.principals.read().get(principal_id).cloned()
    }

    /// Number of live principals.
    #[must_use]
    pub fn principal_count(&self) -> usize {
        self.principals.read().len()
    }

    /// The role table.
    #[must_use]
    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    /// The credential service.
    #[must_use]
    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    /// Runs the full pipeline.
    #[must_use]
    pub fn enforce(&self, request: &OperationRequest) -> Decision {
        let started = Instant::now();
        let decision = self.decide(request);
        let elapsed = started.elapsed();

        if elapsed > LATENCY_BUDGET {
            warn!(
                principal = %request.principal_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "authorization exceeded latency budget"
            );
        }

        if decision.allowed {
            debug!(
                principal = %request.principal_id,
                operation = %request.operation,
                elapsed_us = elapsed.as_micros() as u64,
                "authorization allowed"
            );
        } else {
            warn!(
                principal = %request.principal_id,
                operation = %request.operation,
                stage = ?decision.stage,
                reason = %decision.reason,
                "authorization denied"
            );
        }
        decision
    }

    fn decide(&self, request: &OperationRequest) -> Decision {
        // RECEIVED -> TOKEN_CHECKED
        let payload = match self.check_token(request) {
            Ok(payload) => payload,
            Err(decision) => return decision,
        };

        // TOKEN_CHECKED -> ROLE_RESOLVED
        let Some(role) = self.roles.get(&payload.role) else {
            return Decision::deny(
                DecisionCode::UnknownRole,
                format!("role '{}' is not registered", payload.role),
                Stage::TokenChecked,
            );
        };

        // ROLE_RESOLVED -> OPERATION_CHECKED
        if !role.permits_operation(&request.operation) {
            return Decision::deny(
                DecisionCode::OperationDenied,
                format!("role '{}' may not perform '{}'", role.name(), request.operation),
                Stage::RoleResolved,
            );
        }

        // OPERATION_CHECKED -> PATH_CHECKED
        if let Some(decision) = check_path(role, request.resource_path.as_deref()) {
            return decision;
        }

        // PATH_CHECKED -> APPROVAL_CHECKED
        if role.requires_approval(&request.operation) {
            return Decision::approval_required(
                format!("'{}' by role '{}' needs human approval", request.operation, role.name()),
                Some(role.budget_hint()),
                Stage::PathChecked,
            );
        }

        // APPROVAL_CHECKED -> DECIDED
        Decision::allow(
            format!("'{}' permitted for role '{}'", request.operation, role.name()),
            Some(role.budget_hint()),
        )
    }

    fn check_token(&self, request: &OperationRequest) -> std::result::Result<TokenPayload, Decision> {
        let deny = |detail: String| Decision::deny(DecisionCode::AuthDenied, detail, Stage::Received);

        let expected_hash = match self.principals.read().get(&request.principal_id) {
            Some(principal) => principal.token_hash.clone(),
            None => return Err(deny(format!("unknown principal '{}'", request.principal_id))),
        };

        let payload = self
            .credentials
            .full_validate(&request.token)
            .map_err(|rejection| deny(rejection.to_string()))?;

        if payload.principal_id != request.principal_id {
            return Err(deny("token was issued to a different principal".to_string()));
        }
        if hex::encode(token_digest(&request.token)) != expected_hash {
            debug!(token = %fingerprint(&request.token), "superseded token presented");
            return Err(deny("token is not the principal's current token".to_string()));
        }

        Ok(payload)
    }

    /// Revokes a token known only by its stored hex digest.
    fn revoke_hash(&self, token_hash: &str) -> Result<()> {
        let digest = hex::decode(token_hash)
            .ok()
            .and_then(|bytes| TokenDigest::try_from(bytes.as_slice()).ok())
            .ok_or_else(|| AuthError::Config(format!("corrupt token hash '{}'", token_hash)))?;
        self.credentials.revoke_digest(digest)?;
        Ok(())
    }
}

fn check_path(role: &Role, resource_path: Option<&str>) -> Option<Decision> {
    let path = resource_path?;
    let normalized = normalize_path(path);
    if role.permits_path(&normalized) {
        return None;
    }
    Some(Decision::deny(
        DecisionCode::PathDenied,
        format!(
            "'{}' is outside role '{}' (allowed: {})",
            normalized,
            role.name(),
            role.path_patterns().join(", ")
        ),
        Stage::OperationChecked,
    ))
}

impl std::fmt::Debug for AuthorizationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationPipeline")
            .field("roles", &self.roles.len())
            .field("principals", &self.principal_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialConfig, MasterSecret, MIN_KDF_ITERATIONS};
    use crate::revocation::RevocationList;

    const TTL: Duration = Duration::from_secs(300);

    fn pipeline() -> AuthorizationPipeline {
        let credentials = CredentialService::new(
            MasterSecret::new(b"0123456789abcdef0123456789abcdef".to_vec()).unwrap(),
            CredentialConfig::new().with_kdf_iterations(MIN_KDF_ITERATIONS),
            RevocationList::temporary().unwrap(),
        )
        .unwrap();
        AuthorizationPipeline::new(Arc::new(credentials), Arc::new(RoleRegistry::builtin()))
    }

    #[test]
    fn test_unknown_principal_denied() {
        let p = pipeline();
        let decision = p.enforce(&OperationRequest::new("nobody", "whatever", "Read"));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("AuthDenied"));
        assert_eq!(decision.stage, Stage::Received);
    }

    #[test]
    fn test_allow_attaches_budget_hint() {
        let p = pipeline();
        let token = p.register_principal("agent", "developer", TTL).unwrap();
        let request = OperationRequest::new("agent", token.as_str(), "Write").with_path("/repo/src/main.rs");

        let decision = p.enforce(&request);
        assert!(decision.allowed, "{}", decision.reason);
        assert_eq!(decision.stage, Stage::Decided);
        assert_eq!(decision.budget_hint.unwrap().role, "developer");
    }

    #[test]
    fn test_operation_denied() {
        let p = pipeline();
        let token = p.register_principal("agent", "observer", TTL).unwrap();
        let decision = p.enforce(&OperationRequest::new("agent", token.as_str(), "Write"));
        assert_eq!(decision.code, Some(DecisionCode::OperationDenied));
    }

    #[test]
    fn test_path_denied_lists_patterns() {
        let p = pipeline();
        let token = p.register_principal("agent", "developer", TTL).unwrap();
        let request = OperationRequest::new("agent", token.as_str(), "Read").with_path("/etc/passwd");

        let decision = p.enforce(&request);
        assert_eq!(decision.code, Some(DecisionCode::PathDenied));
        assert!(decision.reason.contains("**/src/**"));
    }

    #[test]
    fn test_traversal_cannot_escape_pattern() {
        let p = pipeline();
        let token = p.register_principal("agent", "developer", TTL).unwrap();
        let request = OperationRequest::new("agent", token.as_str(), "Read").with_path("/repo/src/../../etc/passwd");
        assert_eq!(p.enforce(&request).code, Some(DecisionCode::PathDenied));
    }

    #[test]
    fn test_approval_required_is_soft() {
        let p = pipeline();
        let token = p.register_principal("agent", "developer", TTL).unwrap();
        let decision = p.enforce(&OperationRequest::new("agent", token.as_str(), "Deploy"));

        assert!(!decision.allowed);
        assert!(decision.requires_approval);
        assert!(decision.budget_hint.is_some());
    }

    #[test]
    fn test_token_for_other_principal_denied() {
        let p = pipeline();
        let alice = p.register_principal("alice", "admin", TTL).unwrap();
        p.register_principal("bob", "observer", TTL).unwrap();

        let decision = p.enforce(&OperationRequest::new("bob", alice.as_str(), "Read"));
        assert_eq!(decision.code, Some(DecisionCode::AuthDenied));
        assert!(decision.reason.contains("different principal"));
    }

    #[test]
    fn test_reregistration_supersedes_old_token() {
        let p = pipeline();
        let first = p.register_principal("agent", "observer", TTL).unwrap();
        let second = p.register_principal("agent", "observer", TTL).unwrap();

        assert!(!p.enforce(&OperationRequest::new("agent", first.as_str(), "Read")).allowed);
        assert!(p.enforce(&OperationRequest::new("agent", second.as_str(), "Read")).allowed);
        assert!(p.credentials().is_revoked(first.as_str()));
    }

    #[test]
    fn test_reassign_role() {
        let p = pipeline();
        let token = p.register_principal("agent", "observer", TTL).unwrap();
        let upgraded = p.reassign_role("agent", "developer", TTL).unwrap();

        assert_eq!(p.principal("agent").unwrap().role, "developer");
        assert!(!p.enforce(&OperationRequest::new("agent", token.as_str(), "Read")).allowed);
        assert!(p.enforce(&OperationRequest::new("agent", upgraded.as_str(), "Write")).allowed);

        assert!(matches!(
            p.reassign_role("ghost", "developer", TTL),
            Err(AuthError::UnknownPrincipal(_))
        ));
        assert!(matches!(
            p.reassign_role("agent", "wizard", TTL),
            Err(AuthError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_end_session() {
        let p = pipeline();
        let token = p.register_principal("agent", "observer", TTL).unwrap();
        assert!(p.end_session("agent").unwrap());
        assert!(p.principal("agent").is_none());
        assert!(!p.enforce(&OperationRequest::new("agent", token.as_str(), "Read")).allowed);
        assert!(p.credentials().is_revoked(token.as_str()));
        assert!(!p.end_session("agent").unwrap());
    }

    #[test]
    fn test_register_unknown_role() {
        let p = pipeline();
        assert!(matches!(
            p.register_principal("agent", "wizard", TTL),
            Err(AuthError::UnknownRole(_))
        ));
    }
}
