//! # Credential Service
//!
//! Issues and validates opaque identity tokens bound to a principal and a
//! role.
//!
//! ## Threat Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Token forgery | AES-256-GCM authentication tag |
//! | Bit-flip / splice | Any modified byte fails authentication, never decodes |
//! | Offline secret guessing | PBKDF2-HMAC-SHA256 key stretching per token |
//! | Key reuse across tokens | Fresh 16-byte salt and 12-byte IV per token |
//! | Stolen token replay | Expiry plus persistent revocation list |
//!
//! ## Wire Format
//!
//! ```text
//! base64url( salt[16] ‖ iv[12] ‖ tag[16] ‖ ciphertext[..] )
//! ```
//!
//! The ciphertext is the JSON-serialized [`TokenPayload`]. Callers only ever
//! see the opaque string.
//!
//! ## Validation Order
//!
//! [`CredentialService::full_validate`] checks the revocation list before
//! doing any cryptography, so a revoked token never reaches decryption.
//!
//! ## References
//!
//! - NIST SP 800-38D - Galois/Counter Mode (GCM)
//! - RFC 8018 - PKCS #5 v2.1 (PBKDF2)
//! - RFC 4648 §5 - base64url

use std::time::Duration;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::revocation::{token_digest, RevocationList, TokenDigest};

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length in bytes.
pub const IV_LEN: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Derived key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// Shortest accepted master secret.
pub const MIN_SECRET_LEN: usize = 32;
/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
/// Lowest accepted PBKDF2 iteration count.
pub const MIN_KDF_ITERATIONS: u32 = 1_000;

const HEADER_LEN: usize = SALT_LEN + IV_LEN + TAG_LEN;

/// The process-wide master secret. Never printed.
#[derive(Clone)]
pub struct MasterSecret(Vec<u8>);

impl MasterSecret {
    /// Wraps raw secret bytes.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidSecret` if shorter than [`MIN_SECRET_LEN`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(AuthError::InvalidSecret(format!(
                "need at least {} bytes, got {}",
                MIN_SECRET_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Reads the secret from an environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidSecret` if the variable is unset or short.
    pub fn from_env(var: &str) -> Result<Self> {
        let value = std::env::var(var)
            .map_err(|_| AuthError::InvalidSecret(format!("environment variable {} is not set", var)))?;
        Self::new(value.into_bytes())
    }

    fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

/// Configuration for [`CredentialService`].
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// PBKDF2 iterations per key derivation.
    pub kdf_iterations: u32,
    /// TTL used by [`CredentialService::issue_default`].
    pub default_ttl: Duration,
}

impl CredentialConfig {
    /// Defaults: 100 000 iterations, 8 hour TTL.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            default_ttl: Duration::from_secs(8 * 60 * 60),
        }
    }

    /// Sets the PBKDF2 iteration count.
    #[must_use]
    pub const fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Sets the default TTL.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the iteration count is below the floor
    /// or the default TTL is zero.
    pub fn validate(&self) -> Result<()> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(AuthError::Config(format!(
                "kdf_iterations must be at least {}",
                MIN_KDF_ITERATIONS
            )));
        }
        if self.default_ttl.is_zero() {
            return Err(AuthError::Config("default_ttl must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Claims sealed inside a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Principal the token was issued to.
    pub principal_id: String,
    /// Role granted by the token.
    pub role: String,
    /// Issue time, unix milliseconds.
    pub issued_at: i64,
    /// Expiry time, unix milliseconds.
    pub expires_at: i64,
    /// Random per-token nonce.
    pub nonce: String,
}

impl TokenPayload {
    /// True once `now` is strictly past `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() > self.expires_at
    }

    /// Remaining lifetime, zero if expired.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.expires_at - now.timestamp_millis();
        Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
    }
}

/// An issued token. The inner string is the only thing callers handle.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Wraps a token string received from a caller.
    #[must_use]
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The opaque wire string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the token, returning the wire string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Short digest prefix, safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", self.fingerprint())
    }
}

/// Short, log-safe digest prefix of a token string.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    hex::encode(&token_digest(token)[..6])
}

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenRejection {
    /// Could not be unpacked (bad encoding, truncated, bad payload).
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Authentication tag did not verify.
    #[error("token authentication failed")]
    AuthenticationFailed,
    /// Past its expiry.
    #[error("token expired at {expired_at}")]
    Expired {
        /// Expiry time, unix milliseconds.
        expired_at: i64,
    },
    /// Present on the revocation list.
    #[error("token revoked")]
    Revoked,
}

/// Issues, validates, refreshes and revokes tokens.
///
/// Validation is read-only against the master secret; only the revocation
/// list carries a lock, so concurrent validation from many principals does
/// not contend.
pub struct CredentialService {
    secret: MasterSecret,
    config: CredentialConfig,
    revocations: RevocationList,
}

impl CredentialService {
    /// Creates a service.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if `config` is out of range.
    pub fn new(secret: MasterSecret, config: CredentialConfig, revocations: RevocationList) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            secret,
            config,
            revocations,
        })
    }

    /// Issues a token valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Crypto` or `AuthError::Serialization` if sealing
    /// fails.
    pub fn issue(&self, principal_id: &str, role: &str, ttl: Duration) -> Result<Token> {
        self.issue_at(principal_id, role, ttl, Utc::now())
    }

    /// Issues a token with the configured default TTL.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn issue_default(&self, principal_id: &str, role: &str) -> Result<Token> {
        self.issue(principal_id, role, self.config.default_ttl)
    }

    /// Issues a token as of `now`.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn issue_at(&self, principal_id: &str, role: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Token> {
        let issued_at = now.timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let payload = TokenPayload {
            principal_id: principal_id.to_string(),
            role: role.to_string(),
            issued_at,
            expires_at: issued_at.saturating_add(ttl_ms),
            nonce: uuid::Uuid::new_v4().to_string(),
        };
        let plaintext = serde_json::to_vec(&payload)?;

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let cipher = self.cipher(&salt)?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
            .map_err(|e| AuthError::Crypto(format!("encryption failed: {}", e)))?;

        // aes-gcm appends the tag; the wire format puts it before the body.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut packed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        packed.extend_from_slice(&salt);
        packed.extend_from_slice(&iv);
        packed.extend_from_slice(tag);
        packed.extend_from_slice(ciphertext);

        let token = Token(URL_SAFE_NO_PAD.encode(packed));
        debug!(principal = principal_id, role, token = %token.fingerprint(), "issued token");
        Ok(token)
    }

    /// Authenticates, decrypts and checks expiry.
    ///
    /// Does not consult the revocation list; use
    /// [`full_validate`](Self::full_validate) on the request path.
    pub fn validate(&self, token: &str) -> std::result::Result<TokenPayload, TokenRejection> {
        self.validate_at(token, Utc::now())
    }

    /// [`validate`](Self::validate) as of `now`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<TokenPayload, TokenRejection> {
        let payload = self.open(token)?;
        if payload.is_expired_at(now) {
            return Err(TokenRejection::Expired {
                expired_at: payload.expires_at,
            });
        }
        Ok(payload)
    }

    /// Revocation check first, then cryptographic validation.
    pub fn full_validate(&self, token: &str) -> std::result::Result<TokenPayload, TokenRejection> {
        self.full_validate_at(token, Utc::now())
    }

    /// [`full_validate`](Self::full_validate) as of `now`.
    pub fn full_validate_at(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<TokenPayload, TokenRejection> {
        if self.is_revoked(token) {
            return Err(TokenRejection::Revoked);
        }
        self.validate_at(token, now)
    }

    /// Permanently revokes this exact token string.
    ///
    /// Returns `false` if it was already revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if the revocation cannot be persisted. The
    /// token is still revoked in memory.
    pub fn revoke(&self, token: &str) -> Result<bool> {
        let added = self.revocations.insert(token_digest(token))?;
        if added {
            info!(token = %fingerprint(token), "revoked token");
        }
        Ok(added)
    }

    /// Revokes by digest when the token string itself is no longer held.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if the revocation cannot be persisted.
    pub fn revoke_digest(&self, digest: TokenDigest) -> Result<bool> {
        let added = self.revocations.insert(digest)?;
        if added {
            info!(token = %hex::encode(&digest[..6]), "revoked token by digest");
        }
        Ok(added)
    }

    /// Returns true if the token is on the revocation list.
    #[must_use]
    pub fn is_revoked(&self, token: &str) -> bool {
        self.revocations.contains(&token_digest(token))
    }

    /// Exchanges a valid token for a fresh one and revokes the old one.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError::Rejected` if the presented token is not valid,
    /// or `RefreshError::Failed` if issuing or revoking fails.
    pub fn refresh(&self, token: &str, ttl: Duration) -> std::result::Result<Token, RefreshError> {
        let payload = self.full_validate(token).map_err(RefreshError::Rejected)?;
        let fresh = self
            .issue(&payload.principal_id, &payload.role, ttl)
            .map_err(RefreshError::Failed)?;
        self.revoke(token).map_err(RefreshError::Failed)?;
        Ok(fresh)
    }

    /// The default TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Number of revoked tokens.
    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.revocations.len()
    }

    fn open(&self, token: &str) -> std::result::Result<TokenPayload, TokenRejection> {
        let packed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| TokenRejection::Malformed(e.to_string()))?;
        if packed.len() <= HEADER_LEN {
            return Err(TokenRejection::Malformed(format!(
                "{} bytes is shorter than the {} byte header",
                packed.len(),
                HEADER_LEN
            )));
        }

        let (salt, rest) = packed.split_at(SALT_LEN);
        let (iv, rest) = rest.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let cipher = self
            .cipher(salt)
            .map_err(|e| TokenRejection::Malformed(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), sealed.as_ref())
            .map_err(|_| {
                warn!(token = %fingerprint(token), "token failed authentication");
                TokenRejection::AuthenticationFailed
            })?;

        serde_json::from_slice(&plaintext).map_err(|e| TokenRejection::Malformed(e.to_string()))
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.secret.expose(), salt, self.config.kdf_iterations, &mut key);
        Aes256Gcm::new_from_slice(&key).map_err(|e| AuthError::Crypto(format!("bad key length: {}", e)))
    }
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService")
            .field("kdf_iterations", &self.config.kdf_iterations)
            .field("revoked", &self.revocations.len())
            .finish()
    }
}

/// Failure of [`CredentialService::refresh`].
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The presented token was not valid.
    #[error("refresh rejected: {0}")]
    Rejected(TokenRejection),
    /// Issuing or revoking failed.
    #[error("refresh failed: {0}")]
    Failed(AuthError),
}
