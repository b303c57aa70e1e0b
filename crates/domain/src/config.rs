//! Client configuration
//!
//! Every field except `url` and the keys has a default, so a config file only
//! needs to name what it changes. Secrets are never serialized and never shown
//! by `Debug`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{GhostError, Result};

/// Admin API version sent in `Accept-Version`.
pub const DEFAULT_API_VERSION: &str = "v5.0";

/// Connection and resilience settings for one Ghost site.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Site base URL, e.g. `https://blog.example.com`
    pub url: String,
    /// Admin API key in `id:secret` form
    #[serde(skip_serializing)]
    pub admin_key: Option<String>,
    /// Content API key
    #[serde(skip_serializing)]
    pub content_key: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub api_version: String,
    pub retry: RetrySettings,
    pub circuit_breaker: BreakerSettings,
    pub token: TokenSettings,
}

/// Backoff settings for retried requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
    /// Optional bound on the whole retry sequence
    pub max_elapsed_secs: Option<u64>,
}

/// Circuit breaker settings for the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

/// Admin token lifetime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub lifetime_secs: u64,
    /// A cached token is reused only while more than this remains
    pub min_remaining_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            admin_key: None,
            content_key: None,
            timeout_secs: 30,
            api_version: DEFAULT_API_VERSION.to_string(),
            retry: RetrySettings::default(),
            circuit_breaker: BreakerSettings::default(),
            token: TokenSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
            max_elapsed_secs: None,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_secs: 60 }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self { lifetime_secs: 300, min_remaining_secs: 60 }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "<redacted>"))
            .field("content_key", &self.content_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("api_version", &self.api_version)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("token", &self.token)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    pub fn with_admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }

    pub fn with_content_key(mut self, key: impl Into<String>) -> Self {
        self.content_key = Some(key.into());
        self
    }

    /// Base URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_admin_key(&self) -> bool {
        self.admin_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn has_content_key(&self) -> bool {
        self.content_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// Returns `GhostError::Config` for a missing or non-HTTP URL, a config
    /// with neither key, or out-of-range resilience settings.
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(GhostError::Config("API URL is required".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(GhostError::Config(format!("API URL must use http or https: {url}")));
        }
        if !self.has_admin_key() && !self.has_content_key() {
            return Err(GhostError::Config(
                "Either an admin API key or a content API key is required".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(GhostError::Config("timeout_secs must be greater than 0".to_string()));
        }
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.token.validate()
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(GhostError::Config("retry.base_delay_ms must be greater than 0".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(GhostError::Config(
                "retry.max_delay_ms cannot be less than retry.base_delay_ms".into(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(GhostError::Config(format!(
                "retry.backoff_factor must be greater than 1, got {}",
                self.backoff_factor
            )));
        }
        if self.max_elapsed_secs == Some(0) {
            return Err(GhostError::Config("retry.max_elapsed_secs must be greater than 0".into()));
        }
        Ok(())
    }
}

impl BreakerSettings {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(GhostError::Config(
                "circuit_breaker.failure_threshold must be greater than 0".into(),
            ));
        }
        if self.recovery_timeout_secs == 0 {
            return Err(GhostError::Config(
                "circuit_breaker.recovery_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl TokenSettings {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    pub fn min_remaining(&self) -> Duration {
        Duration::from_secs(self.min_remaining_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.lifetime_secs <= self.min_remaining_secs {
            return Err(GhostError::Config(format!(
                "token.lifetime_secs ({}) must exceed token.min_remaining_secs ({})",
                self.lifetime_secs, self.min_remaining_secs
            )));
        }
        Ok(())
    }
}
