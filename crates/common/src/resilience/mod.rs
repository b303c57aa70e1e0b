//! Resilience patterns for fault tolerance and error handling
//!
//! - **Circuit Breaker**: stops calling a resource after repeated failures and
//!   probes it again once a recovery window has passed
//! - **Retry**: exponential backoff with jitter, driven by per-error retry
//!   conditions
//!
//! Both are synchronous and generic over the operation's error type. Time,
//! sleeping and randomness are injected through [`Clock`], [`Sleeper`] and
//! [`JitterSource`] so every transition can be tested without real delays.

pub mod circuit_breaker;
pub mod clock;
pub mod retry;
pub mod sleeper;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState, ConfigError, ConfigResult,
    ResilienceError, ResilienceResult,
};
#[cfg(any(test, feature = "test-utils"))]
pub use clock::MockClock;
pub use clock::{Clock, SystemClock};
pub use retry::{
    retry_with_policy, DelayHint, JitterSource, RetryCondition, RetryError,
    RetryExecutor, RetryMetrics, RetryMetricsSnapshot, RetryOutcome, RetryPolicy,
    RetryPolicyBuilder, RetryResult, StopReason, ThreadRngJitter,
};
pub use sleeper::{CancellationToken, Interrupted, Sleeper, ThreadSleeper};

#[cfg(any(test, feature = "test-utils"))]
pub use retry::FixedJitter;
#[cfg(any(test, feature = "test-utils"))]
pub use sleeper::MockSleeper;
