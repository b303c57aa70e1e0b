//! Admin API token signing
//!
//! Tokens are short-lived HS256 JWTs keyed by the admin key secret. The
//! header carries the key id as `kid` so the server can select the secret.

use std::fmt;
use std::time::Duration;

use ghostctl_domain::{GhostError, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credential::AdminKey;

/// Audience every admin token is issued for.
pub const ADMIN_AUDIENCE: &str = "/admin/";

/// Claims carried by an admin token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Key id of the signing key
    pub iss: String,
    pub aud: String,
    /// Issued-at, epoch seconds
    pub iat: u64,
    /// Expiry, epoch seconds
    pub exp: u64,
    /// Unique token id; keeps two tokens signed in the same second distinct
    pub jti: String,
}

/// A signed token and the window it is valid for.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedToken {
    value: String,
    issued_at: u64,
    expires_at: u64,
}

impl SignedToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Seconds left before expiry at `now`, zero once expired.
    pub fn remaining_at(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    /// True while strictly more than `min_remaining` is left at `now`.
    pub fn is_valid_for(&self, now: u64, min_remaining: Duration) -> bool {
        self.remaining_at(now) > min_remaining.as_secs()
    }
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Stateless HS256 signer for admin tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSigner;

impl TokenSigner {
    pub fn new() -> Self {
        Self
    }

    /// Sign a token for `key` valid from `issued_at` for `lifetime`.
    ///
    /// # Errors
    /// Returns `GhostError::Auth` if the JWT cannot be encoded.
    pub fn sign(&self, key: &AdminKey, issued_at: u64, lifetime: Duration) -> Result<SignedToken> {
        let expires_at = issued_at.saturating_add(lifetime.as_secs());
        let claims = AdminClaims {
            iss: key.key_id().to_string(),
            aud: ADMIN_AUDIENCE.to_string(),
            iat: issued_at,
            exp: expires_at,
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(key.key_id().to_string());

        let value = encode(&header, &claims, &EncodingKey::from_secret(key.secret()))
            .map_err(|e| GhostError::Auth(format!("Failed to sign admin token: {e}")))?;

        Ok(SignedToken { value, issued_at, expires_at })
    }

    /// Decode `token` and check signature, issuer, audience and expiry
    /// against `now` (epoch seconds).
    ///
    /// # Errors
    /// Returns `GhostError::Auth` describing the first check that failed.
    pub fn verify(&self, key: &AdminKey, token: &str, now: u64) -> Result<AdminClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[key.key_id()]);
        validation.set_audience(&[ADMIN_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.leeway = 0;

        let data =
            decode::<AdminClaims>(token, &DecodingKey::from_secret(key.secret()), &validation)
                .map_err(|e| GhostError::Auth(format!("Invalid admin token: {e}")))?;

        if data.claims.exp <= now {
            return Err(GhostError::Auth("Admin token has expired".to_string()));
        }
        Ok(data.claims)
    }
}
