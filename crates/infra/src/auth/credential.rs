//! Admin and content API credentials
//!
//! An admin key has the form `<key-id>:<secret-hex>`. The key id is the
//! 24-character lowercase hex identifier Ghost issues; the secret is
//! hex-decoded once here and used as the raw HMAC key.

use std::fmt;
use std::str::FromStr;

use ghostctl_domain::{GhostError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static KEY_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{24}$").expect("KEY_ID_REGEX should compile - this is a bug"));

/// Parsed admin API key.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminKey {
    key_id: String,
    secret: Vec<u8>,
}

impl AdminKey {
    /// Parse `"<key-id>:<secret-hex>"`.
    ///
    /// # Errors
    /// Returns `GhostError::Auth` when the separator is missing, the key id
    /// does not match `^[a-f0-9]{24}$`, or the secret is empty or not hex.
    pub fn parse(raw: &str) -> Result<Self> {
        let (key_id, secret_hex) = raw.trim().split_once(':').ok_or_else(|| {
            GhostError::Auth("Invalid admin API key format, expected 'id:secret'".to_string())
        })?;

        if !KEY_ID_REGEX.is_match(key_id) {
            return Err(GhostError::Auth(
                "Invalid admin API key id, expected 24 lowercase hex characters".to_string(),
            ));
        }
        if secret_hex.is_empty() {
            return Err(GhostError::Auth("Admin API key secret is empty".to_string()));
        }

        let secret = hex::decode(secret_hex).map_err(|e| {
            GhostError::Auth(format!("Admin API key secret is not valid hex: {e}"))
        })?;

        Ok(Self { key_id: key_id.to_string(), secret })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl FromStr for AdminKey {
    type Err = GhostError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminKey")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Content API key, sent as the `key` query parameter.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey(String);

impl ContentKey {
    /// # Errors
    /// Returns `GhostError::Auth` for an empty or blank key.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GhostError::Auth("Content API key is empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(<redacted>)")
    }
}
