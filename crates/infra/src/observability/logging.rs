//! Tracing subscriber setup
//!
//! The filter comes from `GHOSTCTL_LOG`, then `RUST_LOG`, then `info`.
//! Installing twice is harmless: the second call reports that a subscriber
//! already exists and leaves the first in place.

use std::str::FromStr;

use ghostctl_domain::GhostError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Primary filter variable.
pub const LOG_ENV: &str = "GHOSTCTL_LOG";

pub const DEFAULT_LEVEL: &str = "info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for terminals
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = GhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(GhostError::InvalidInput(format!("Unknown log format: {other}"))),
        }
    }
}

/// Resolve the filter directive from the environment.
pub fn filter_directive() -> String {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Install the global subscriber.
///
/// # Errors
/// Returns `GhostError::Internal` if a global subscriber is already set.
pub fn init(format: LogFormat) -> Result<(), GhostError> {
    let filter = build_filter(&filter_directive());
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(true)).try_init(),
    };

    result.map_err(|e| GhostError::Internal(format!("Failed to install tracing subscriber: {e}")))
}
