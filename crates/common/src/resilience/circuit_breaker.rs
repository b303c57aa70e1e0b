//! Circuit breaker guarding a remote resource.
//!
//! A breaker counts failures of the operations it wraps. Once
//! `failure_threshold` failures accumulate it opens and rejects calls without
//! running them. After `recovery_timeout` has passed since the last failure the
//! next call is admitted in the half-open state: success closes the circuit,
//! failure reopens it and restarts the recovery window.
//!
//! State, failure count and the last failure instant live behind a single
//! lock. The wrapped operation itself always runs with the lock released.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};

//==============================================================================
// Error Types
//==============================================================================

/// Configuration validation error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Errors returned by [`CircuitBreaker::call`] and
/// [`CircuitBreaker::call_with`].
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// The operation's own error, if the operation ran.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::CircuitOpen => None,
            Self::OperationFailed { source } => Some(source),
        }
    }
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Recovery window elapsed; the next outcome decides the state
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before an open circuit admits a probe
    pub recovery_timeout: Duration,
    /// Whether a success while closed clears the failure count
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            reset_on_success: true,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::invalid("recovery_timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    /// Set a custom clock for the circuit breaker (useful for testing)
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with custom clock that builds a CircuitBreaker directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self { state: CircuitState::Closed, failure_count: 0, last_failure_at: None }
    }
}

/// Three-state circuit breaker.
///
/// Clones share state, so one breaker can be handed to every caller of the
/// resource it protects.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration using system
    /// clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::unchecked(CircuitBreakerConfig::default(), SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::unchecked(config, clock))
    }

    fn unchecked(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(BreakerState::closed())),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation`, counting every error as a failure.
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.call_with(operation, |_| true)
    }

    /// Run `operation`, counting only errors for which `trips` returns `true`.
    ///
    /// Errors that do not trip the breaker are still returned to the caller;
    /// they simply leave the failure count untouched.
    #[instrument(skip(self, operation, trips), fields(state = %self.get_state()))]
    pub fn call_with<F, T, E, P>(&self, operation: F, trips: P) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        P: FnOnce(&E) -> bool,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(admitted_in) = self.admit() else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!("Circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        };
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation() {
            Ok(value) => {
                self.on_success(admitted_in);
                Ok(value)
            }
            Err(error) => {
                if trips(&error) {
                    self.on_failure(admitted_in);
                } else {
                    debug!(error = %error, "Circuit breaker ignoring non-tripping error");
                }
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Decide whether a call may run, moving Open to HalfOpen once the
    /// recovery window has elapsed. Returns the state the call runs under.
    fn admit(&self) -> Option<CircuitState> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Some(inner.state),
            CircuitState::Open => {
                let recovered = inner.last_failure_at.map_or(true, |at| {
                    self.clock.now().saturating_duration_since(at) >= self.config.recovery_timeout
                });
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker half-open, admitting probe call");
                    Some(CircuitState::HalfOpen)
                } else {
                    None
                }
            }
        }
    }

    fn on_success(&self, admitted_in: CircuitState) {
        let mut inner = self.inner.lock();
        match admitted_in {
            CircuitState::HalfOpen => {
                if inner.state == CircuitState::HalfOpen {
                    *inner = BreakerState::closed();
                    info!("Circuit breaker closed after successful probe");
                }
            }
            CircuitState::Closed => {
                if self.config.reset_on_success && inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, admitted_in: CircuitState) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        // A late failure from a call admitted earlier must not extend the
        // recovery window of an already open breaker.
        if inner.state == CircuitState::Open {
            debug!("failure recorded while circuit already open");
            return;
        }
        inner.last_failure_at = Some(now);

        if admitted_in == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            warn!("Circuit breaker reopened after failed probe");
            return;
        }

        inner.failure_count = inner.failure_count.saturating_add(1);
        if inner.state == CircuitState::Closed && inner.failure_count >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            warn!(failures = inner.failure_count, "Circuit breaker opened");
        }
    }

    /// Get the current state of the circuit breaker
    pub fn get_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        info!("Circuit breaker manually reset to closed state");
    }
}
