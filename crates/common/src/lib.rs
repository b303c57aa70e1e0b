//! Generic building blocks shared across ghostctl crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error and locking dependencies shared by every tier
//! - `runtime`: resilience (clock, sleeper, retry executor, circuit breaker)
//! - `test-utils`: deterministic test doubles (`MockClock`, `MockSleeper`,
//!   `FixedJitter`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use resilience::{
    retry_with_policy, CancellationToken, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState, Clock, ConfigError,
    JitterSource, ResilienceError, ResilienceResult, RetryError,
    RetryExecutor, RetryMetrics, RetryMetricsSnapshot, RetryOutcome, RetryPolicy, RetryResult,
    Sleeper, StopReason, SystemClock, ThreadSleeper,
};

// Test doubles
// ------------------------
#[cfg(all(feature = "runtime", any(test, feature = "test-utils")))]
pub use resilience::{FixedJitter, MockClock, MockSleeper};
