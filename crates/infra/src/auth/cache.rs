//! Cached admin token
//!
//! One cache per admin key. The check-then-sign sequence runs under a single
//! lock, so concurrent callers either share the cached token or see the one
//! freshly signed by whichever caller got there first.

use std::time::Duration;

use ghostctl_common::resilience::{Clock, SystemClock};
use ghostctl_domain::Result;
use parking_lot::Mutex;
use tracing::debug;

use super::credential::AdminKey;
use super::signer::{SignedToken, TokenSigner};

/// Default token lifetime.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Token cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from the cached token
    pub hits: u64,
    /// Requests that required signing a new token
    pub misses: u64,
    pub has_token: bool,
    /// Expiry of the cached token, epoch seconds
    pub expires_at: Option<u64>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    current: Option<SignedToken>,
    hits: u64,
    misses: u64,
}

/// Holds the most recently signed admin token and re-signs it near expiry.
pub struct TokenCache<C: Clock = SystemClock> {
    key: AdminKey,
    signer: TokenSigner,
    lifetime: Duration,
    clock: C,
    state: Mutex<CacheState>,
}

impl<C: Clock> std::fmt::Debug for TokenCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("key_id", &self.key.key_id())
            .field("lifetime", &self.lifetime)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TokenCache<SystemClock> {
    pub fn new(key: AdminKey, lifetime: Duration) -> Self {
        Self::with_clock(key, lifetime, SystemClock)
    }
}

impl<C: Clock> TokenCache<C> {
    pub fn with_clock(key: AdminKey, lifetime: Duration, clock: C) -> Self {
        Self {
            key,
            signer: TokenSigner::new(),
            lifetime,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Return a token with more than `min_remaining` left, signing a new one
    /// when the cached token is missing or too close to expiry.
    ///
    /// # Errors
    /// Returns `GhostError::Auth` if signing fails; the cache is left as it
    /// was.
    pub fn get_valid_token(&self, min_remaining: Duration) -> Result<String> {
        let mut state = self.state.lock();
        let now = self.clock.epoch_seconds();

        if let Some(token) = state.current.as_ref().filter(|t| t.is_valid_for(now, min_remaining)) {
            let value = token.value().to_string();
            state.hits += 1;
            return Ok(value);
        }

        let token = self.signer.sign(&self.key, now, self.lifetime)?;
        debug!(key_id = %self.key.key_id(), expires_at = token.expires_at(), "signed new admin token");
        let value = token.value().to_string();
        state.current = Some(token);
        state.misses += 1;
        Ok(value)
    }

    /// Drop the cached token so the next request signs a fresh one.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        if state.current.take().is_some() {
            debug!(key_id = %self.key.key_id(), "admin token invalidated");
        }
    }

    /// Whether `token` was signed by this cache's key and is unexpired now.
    pub fn validate_token(&self, token: &str) -> bool {
        self.signer.verify(&self.key, token, self.clock.epoch_seconds()).is_ok()
    }

    pub fn current_token(&self) -> Option<SignedToken> {
        self.state.lock().current.clone()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            has_token: state.current.is_some(),
            expires_at: state.current.as_ref().map(SignedToken::expires_at),
        }
    }
}
