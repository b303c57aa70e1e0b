//! Retry executor with exponential backoff and jitter.
//!
//! [`RetryExecutor::run`] invokes an operation up to `max_retries + 1` times.
//! Between attempts it sleeps for
//! `min(base_delay * backoff_factor^attempt, max_delay)`, optionally stretched
//! by a random fraction of itself. Which errors are worth another attempt is
//! decided by predicates registered with
//! [`RetryExecutor::add_retry_condition`]; an error that matches none of them
//! stops the sequence at once.
//!
//! Delay computation is pure ([`RetryPolicy::calculate_delay`],
//! [`RetryPolicy::jittered_delay`]). Sleeping, randomness and elapsed-time
//! measurement are injected ([`Sleeper`], [`JitterSource`], [`Clock`]) so the
//! whole loop runs deterministically under test.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::sleeper::{Sleeper, ThreadSleeper};
use super::ConfigError;

/// Why a retry sequence gave up on an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The retry budget was spent.
    Exhausted,
    /// No retry condition matched the error.
    NonRetryable,
}

/// Errors produced by [`RetryExecutor`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The sequence stopped on a failure, either because the budget ran out or
    /// because the failure was not retryable.
    #[error("maximum retries exceeded after {attempts} attempt(s): {source}")]
    MaxRetriesExceeded { attempts: u32, reason: StopReason, source: E },

    /// The next backoff would have pushed the sequence past its deadline.
    #[error("retry deadline of {deadline:?} exceeded after {attempts} attempt(s): {source}")]
    DeadlineExceeded { attempts: u32, deadline: Duration, source: E },

    /// The sleeper was cancelled before or during a backoff.
    #[error("retry sequence cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::MaxRetriesExceeded { attempts, .. }
            | Self::DeadlineExceeded { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The last error returned by the operation, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::MaxRetriesExceeded { source, .. } | Self::DeadlineExceeded { source, .. } => {
                Some(source)
            }
            Self::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }

    /// Consume the error and return the operation's last error.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::MaxRetriesExceeded { source, .. } | Self::DeadlineExceeded { source, .. } => {
                Some(source)
            }
            Self::Cancelled { last_error, .. } => last_error,
        }
    }

    /// `true` when the sequence stopped because the budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { reason: StopReason::Exhausted, .. })
    }
}

/// Result type for retry operations.
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Outcome of one retry sequence.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    /// Number of operation invocations.
    pub attempts: u32,
    /// Sum of all backoff delays actually slept.
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn last_error(&self) -> Option<&E> {
        self.result.as_ref().err().and_then(RetryError::last_error)
    }

    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }
}

/// Immutable backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Upper bound on the time a whole retry sequence may take.
    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    /// Backoff before retry number `attempt + 1`, without jitter.
    ///
    /// `min(base_delay * backoff_factor^attempt, max_delay)`, at nanosecond
    /// resolution. Monotonically non-decreasing in `attempt`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        if scaled >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(scaled as u64)
    }

    /// Backoff stretched by `fraction` of itself.
    ///
    /// `fraction` is clamped into `[0, 1)`, so the result lies in
    /// `[delay, 2 * delay)`.
    pub fn jittered_delay(&self, attempt: u32, fraction: f64) -> Duration {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, MAX_FRACTION) } else { 0.0 };
        let delay = self.calculate_delay(attempt);
        let nanos = delay.as_nanos();
        let extra = ((nanos as f64 * fraction) as u128).min(nanos.saturating_sub(1));
        delay.saturating_add(Duration::from_nanos(u64::try_from(extra).unwrap_or(u64::MAX)))
    }

    /// Backoff for `attempt`, drawing jitter from `source` when enabled.
    pub fn delay_for(&self, attempt: u32, source: &dyn JitterSource) -> Duration {
        if self.jitter {
            self.jittered_delay(attempt, source.next_fraction())
        } else {
            self.calculate_delay(attempt)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid("base_delay must be greater than 0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(format!(
                "max_delay ({:?}) cannot be less than base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(ConfigError::invalid(format!(
                "backoff_factor must be greater than 1, got {}",
                self.backoff_factor
            )));
        }
        if self.max_elapsed.is_some_and(|limit| limit.is_zero()) {
            return Err(ConfigError::invalid("max_elapsed must be greater than 0 when set"));
        }
        Ok(())
    }
}

const MAX_FRACTION: f64 = 1.0 - f64::EPSILON;

/// Builder for [`RetryPolicy`] with validation on `build`.
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(false)
    }

    pub fn max_elapsed(mut self, limit: Duration) -> Self {
        self.policy.max_elapsed = Some(limit);
        self
    }

    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Source of uniformly distributed fractions in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn next_fraction(&self) -> f64;
}

/// Jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn next_fraction(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Always returns the same fraction. For tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

#[cfg(any(test, feature = "test-utils"))]
impl JitterSource for FixedJitter {
    fn next_fraction(&self) -> f64 {
        self.0
    }
}

/// Counters accumulated across every sequence run by the executors that share
/// this instance.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total_operations: AtomicU64,
    successful_operations: AtomicU64,
    failed_operations: AtomicU64,
    total_retry_attempts: AtomicU64,
    total_delay_nanos: AtomicU64,
}

impl RetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_start(&self) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self, delay: Duration) {
        self.total_retry_attempts.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        self.total_delay_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn record_finish(&self, succeeded: bool) {
        if succeeded {
            self.successful_operations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_operations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RetryMetricsSnapshot {
        RetryMetricsSnapshot {
            total_operations: self.total_operations.load(Ordering::Acquire),
            successful_operations: self.successful_operations.load(Ordering::Acquire),
            failed_operations: self.failed_operations.load(Ordering::Acquire),
            total_retry_attempts: self.total_retry_attempts.load(Ordering::Acquire),
            total_delay: Duration::from_nanos(self.total_delay_nanos.load(Ordering::Acquire)),
        }
    }

    pub fn reset(&self) {
        self.total_operations.store(0, Ordering::Release);
        self.successful_operations.store(0, Ordering::Release);
        self.failed_operations.store(0, Ordering::Release);
        self.total_retry_attempts.store(0, Ordering::Release);
        self.total_delay_nanos.store(0, Ordering::Release);
    }
}

/// Point-in-time copy of [`RetryMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryMetricsSnapshot {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retry_attempts: u64,
    pub total_delay: Duration,
}

impl RetryMetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.successful_operations as f64 / self.total_operations as f64
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.failed_operations as f64 / self.total_operations as f64
    }

    pub fn average_retry_delay(&self) -> Duration {
        match u32::try_from(self.total_retry_attempts) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(retries) => self.total_delay / retries,
        }
    }
}

/// Predicate deciding whether an error deserves another attempt.
pub type RetryCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Optional server-supplied delay that replaces the computed backoff, capped
/// at the policy's `max_delay`.
pub type DelayHint<E> = Arc<dyn Fn(&E) -> Option<Duration> + Send + Sync>;

/// Runs an operation under a [`RetryPolicy`].
pub struct RetryExecutor<E> {
    policy: RetryPolicy,
    conditions: Vec<RetryCondition<E>>,
    delay_hint: Option<DelayHint<E>>,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn JitterSource>,
    clock: Arc<dyn Clock>,
    metrics: Arc<RetryMetrics>,
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("conditions", &self.conditions.len())
            .field("delay_hint", &self.delay_hint.is_some())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            conditions: self.conditions.clone(),
            delay_hint: self.delay_hint.clone(),
            sleeper: Arc::clone(&self.sleeper),
            jitter: Arc::clone(&self.jitter),
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<E> RetryExecutor<E> {
    /// Executor with no retry conditions, sleeping on the calling thread.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            conditions: Vec::new(),
            delay_hint: None,
            sleeper: Arc::new(ThreadSleeper::new()),
            jitter: Arc::new(ThreadRngJitter),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(RetryMetrics::new()),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share counters with other executors.
    pub fn with_metrics(mut self, metrics: Arc<RetryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_retry_condition<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.add_retry_condition(predicate);
        self
    }

    /// Let matching errors dictate their own backoff (e.g. `Retry-After`).
    ///
    /// A hint longer than the policy's `max_delay` is capped to it.
    pub fn with_delay_hint<H>(mut self, hint: H) -> Self
    where
        H: Fn(&E) -> Option<Duration> + Send + Sync + 'static,
    {
        self.delay_hint = Some(Arc::new(hint));
        self
    }

    pub fn add_retry_condition<P>(&mut self, predicate: P)
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Arc::new(predicate));
    }

    /// `true` if any registered condition accepts `error`.
    pub fn should_retry(&self, error: &E) -> bool {
        self.conditions.iter().any(|condition| condition(error))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> RetryMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl<E: fmt::Display> RetryExecutor<E> {
    /// Run `operation` until it succeeds, fails non-retryably, or the budget
    /// is spent.
    pub fn run<T, F>(&self, operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.run_with_outcome(operation).into_result()
    }

    /// Like [`run`](Self::run), also reporting attempts and total delay.
    #[instrument(skip_all, fields(max_retries = self.policy.max_retries))]
    pub fn run_with_outcome<T, F>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.metrics.record_start();
        let started = self.clock.now();
        let mut total_delay = Duration::ZERO;
        let mut attempt: u32 = 0;

        if self.sleeper.is_cancelled() {
            self.metrics.record_finish(false);
            return RetryOutcome {
                result: Err(RetryError::Cancelled { attempts: 0, last_error: None }),
                attempts: 0,
                total_delay,
            };
        }

        loop {
            let attempts = attempt + 1;
            debug!(attempt = attempts, max_attempts = self.policy.max_retries + 1, "executing operation");

            let error = match operation() {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retries");
                    }
                    self.metrics.record_finish(true);
                    return RetryOutcome { result: Ok(value), attempts, total_delay };
                }
                Err(error) => error,
            };

            let stop = if attempt >= self.policy.max_retries {
                Some(StopReason::Exhausted)
            } else if !self.should_retry(&error) {
                Some(StopReason::NonRetryable)
            } else {
                None
            };

            if let Some(reason) = stop {
                match reason {
                    StopReason::Exhausted => {
                        warn!(attempts, error = %error, "all retry attempts exhausted");
                    }
                    StopReason::NonRetryable => {
                        debug!(attempts, error = %error, "error is not retryable");
                    }
                }
                self.metrics.record_finish(false);
                return RetryOutcome {
                    result: Err(RetryError::MaxRetriesExceeded { attempts, reason, source: error }),
                    attempts,
                    total_delay,
                };
            }

            let delay = self
                .delay_hint
                .as_ref()
                .and_then(|hint| hint(&error))
                .map(|hinted| hinted.min(self.policy.max_delay))
                .unwrap_or_else(|| self.policy.delay_for(attempt, self.jitter.as_ref()));

            if let Some(deadline) = self.policy.max_elapsed {
                let elapsed = self.clock.now().saturating_duration_since(started);
                if elapsed.saturating_add(delay) > deadline {
                    warn!(attempts, ?elapsed, ?deadline, "retry deadline would be exceeded");
                    self.metrics.record_finish(false);
                    return RetryOutcome {
                        result: Err(RetryError::DeadlineExceeded { attempts, deadline, source: error }),
                        attempts,
                        total_delay,
                    };
                }
            }

            warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %error, "operation failed, retrying");

            if self.sleeper.sleep(delay).is_err() {
                debug!(attempts, "retry backoff cancelled");
                self.metrics.record_finish(false);
                return RetryOutcome {
                    result: Err(RetryError::Cancelled { attempts, last_error: Some(error) }),
                    attempts,
                    total_delay,
                };
            }

            self.metrics.record_retry(delay);
            total_delay += delay;
            attempt += 1;
        }
    }
}

/// Build a one-off executor and run `operation` under `policy`, retrying the
/// errors `is_retryable` accepts.
pub fn retry_with_policy<T, E, F, P>(policy: RetryPolicy, is_retryable: P, operation: F) -> RetryResult<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool + Send + Sync + 'static,
{
    RetryExecutor::new(policy).with_retry_condition(is_retryable).run(operation)
}

#[cfg(test)]
mod tests {
    //! Unit tests for backoff computation and the retry loop.
    //!
    //! Every executor here sleeps through a `MockSleeper`, so the tests assert
    //! the requested delays rather than waiting for them.

    use std::cell::Cell;

    use super::*;
    use crate::resilience::clock::MockClock;
    use crate::resilience::sleeper::{CancellationToken, MockSleeper};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Transient(&'static str),
        Permanent(&'static str),
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Transient(msg) => write!(f, "transient: {msg}"),
                Self::Permanent(msg) => write!(f, "permanent: {msg}"),
            }
        }
    }

    impl std::error::Error for TestError {}

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(30))
            .backoff_factor(2.0)
            .no_jitter()
            .build()
            .expect("valid policy")
    }

    fn executor(policy: RetryPolicy, sleeper: &MockSleeper) -> RetryExecutor<TestError> {
        RetryExecutor::new(policy)
            .with_sleeper(Arc::new(sleeper.clone()))
            .with_retry_condition(|e: &TestError| matches!(e, TestError::Transient(_)))
    }

    // =========================================================================
    // Delay computation
    // =========================================================================

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(60));
        assert!((policy.backoff_factor() - 2.0).abs() < f64::EPSILON);
        assert!(policy.jitter());
        assert_eq!(policy.max_elapsed(), None);
    }

    /// Validates the exponential formula and the cap.
    ///
    /// Assertions:
    /// - Delays are 1s, 2s, 4s, 8s, 16s for attempts 0..=4.
    /// - Attempt 5 and beyond are capped at 30s.
    #[test]
    fn test_calculate_delay_exponential_with_cap() {
        let policy = policy(10);

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(8));
        assert_eq!(policy.calculate_delay(4), Duration::from_secs(16));
        assert_eq!(policy.calculate_delay(5), Duration::from_secs(30));
        assert_eq!(policy.calculate_delay(500), Duration::from_secs(30));
        assert_eq!(policy.calculate_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_calculate_delay_is_monotonic() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(150))
            .max_delay(Duration::from_secs(45))
            .backoff_factor(1.7)
            .build()
            .expect("valid policy");

        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.calculate_delay(attempt);
            assert!(delay >= previous, "delay decreased at attempt {attempt}");
            assert!(delay <= Duration::from_secs(45));
            previous = delay;
        }
    }

    /// Validates that sub-millisecond bases keep their precision.
    ///
    /// Assertions:
    /// - A 500µs base never collapses to zero.
    /// - A 1500µs base doubles to exactly 3ms, and jitter scales it exactly.
    #[test]
    fn test_calculate_delay_keeps_sub_millisecond_precision() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_micros(500))
            .max_delay(Duration::from_secs(1))
            .backoff_factor(2.0)
            .no_jitter()
            .build()
            .expect("valid policy");
        assert_eq!(policy.calculate_delay(0), Duration::from_micros(500));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(1));

        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_micros(1500))
            .max_delay(Duration::from_secs(1))
            .backoff_factor(2.0)
            .build()
            .expect("valid policy");
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(3));
        assert_eq!(policy.jittered_delay(0, 0.5), Duration::from_micros(2250));
    }

    #[test]
    fn test_jittered_delay_scales_by_fraction() {
        let policy = policy(3);

        assert_eq!(policy.jittered_delay(0, 0.0), Duration::from_secs(1));
        assert_eq!(policy.jittered_delay(0, 0.5), Duration::from_millis(1500));
        assert_eq!(policy.jittered_delay(1, 0.25), Duration::from_millis(2500));
    }

    #[test]
    fn test_jittered_delay_stays_below_double() {
        let policy = policy(3);
        for fraction in [0.0, 0.1, 0.5, 0.999, 1.0, 7.0, -3.0, f64::NAN] {
            let delay = policy.jittered_delay(2, fraction);
            assert!(delay >= Duration::from_secs(4), "fraction {fraction} went below base");
            assert!(delay < Duration::from_secs(8), "fraction {fraction} reached 2x");
        }
    }

    #[test]
    fn test_thread_rng_jitter_in_unit_interval() {
        let source = ThreadRngJitter;
        for _ in 0..1000 {
            let fraction = source.next_fraction();
            assert!((0.0..1.0).contains(&fraction));
        }
    }

    #[test]
    fn test_delay_for_uses_jitter_only_when_enabled() {
        let jittered = RetryPolicy::builder().jitter(true).build().expect("valid policy");
        let plain = RetryPolicy::builder().no_jitter().build().expect("valid policy");
        let source = FixedJitter(0.5);

        assert_eq!(jittered.delay_for(1, &source), Duration::from_secs(3));
        assert_eq!(plain.delay_for(1, &source), Duration::from_secs(2));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::builder().base_delay(Duration::ZERO).build().is_err());
        assert!(RetryPolicy::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(5))
            .build()
            .is_err());
        assert!(RetryPolicy::builder().backoff_factor(1.0).build().is_err());
        assert!(RetryPolicy::builder().backoff_factor(f64::INFINITY).build().is_err());
        assert!(RetryPolicy::builder().max_elapsed(Duration::ZERO).build().is_err());
        assert!(RetryPolicy::builder().max_retries(0).build().is_ok());
    }

    // =========================================================================
    // Retry loop
    // =========================================================================

    #[test]
    fn test_success_first_try_charges_no_delay() {
        let sleeper = MockSleeper::new();
        let outcome = executor(policy(3), &sleeper).run_with_outcome(|| Ok::<_, TestError>(7));

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_delay, Duration::ZERO);
        assert_eq!(sleeper.count(), 0);
    }

    /// Validates that `k < max_retries` failures followed by success sleep
    /// exactly `k` times.
    #[test]
    fn test_k_failures_then_success_sleeps_k_times() {
        for k in 0..3u32 {
            let sleeper = MockSleeper::new();
            let calls = Cell::new(0u32);

            let result = executor(policy(3), &sleeper).run(|| {
                let n = calls.get();
                calls.set(n + 1);
                if n < k {
                    Err(TestError::Transient("flaky"))
                } else {
                    Ok("done")
                }
            });

            assert_eq!(result.expect("should succeed"), "done");
            assert_eq!(calls.get(), k + 1);
            assert_eq!(sleeper.count(), k as usize);
        }
    }

    #[test]
    fn test_always_failing_exhausts_budget() {
        let sleeper = MockSleeper::new();
        let calls = Cell::new(0u32);

        let err = executor(policy(3), &sleeper)
            .run(|| -> Result<(), _> {
                calls.set(calls.get() + 1);
                Err(TestError::Transient("down"))
            })
            .expect_err("should exhaust");

        assert_eq!(calls.get(), 4);
        assert_eq!(err.attempts(), 4);
        assert!(err.is_exhausted());
        assert!(matches!(
            err,
            RetryError::MaxRetriesExceeded { attempts: 4, reason: StopReason::Exhausted, .. }
        ));
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_non_retryable_stops_after_first_attempt() {
        let sleeper = MockSleeper::new();
        let calls = Cell::new(0u32);

        let err = executor(policy(3), &sleeper)
            .run(|| -> Result<(), _> {
                calls.set(calls.get() + 1);
                Err(TestError::Permanent("bad input"))
            })
            .expect_err("should stop");

        assert_eq!(calls.get(), 1);
        assert_eq!(sleeper.count(), 0);
        assert!(!err.is_exhausted());
        assert_eq!(err.last_error(), Some(&TestError::Permanent("bad input")));
        assert!(matches!(
            err,
            RetryError::MaxRetriesExceeded { attempts: 1, reason: StopReason::NonRetryable, .. }
        ));
    }

    #[test]
    fn test_no_conditions_means_nothing_is_retried() {
        let sleeper = MockSleeper::new();
        let executor: RetryExecutor<TestError> =
            RetryExecutor::new(policy(3)).with_sleeper(Arc::new(sleeper.clone()));

        let err = executor
            .run(|| -> Result<(), _> { Err(TestError::Transient("x")) })
            .expect_err("should stop");

        assert_eq!(err.attempts(), 1);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn test_zero_retries_runs_once() {
        let sleeper = MockSleeper::new();
        let err = executor(policy(0), &sleeper)
            .run(|| -> Result<(), _> { Err(TestError::Transient("x")) })
            .expect_err("should stop");

        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 1);
        assert_eq!(sleeper.count(), 0);
    }

    /// Two server-style failures under `max_retries=3, base=1s, factor=2`
    /// sleep 1s then 2s and succeed on the third attempt.
    #[test]
    fn test_two_failures_sleep_one_then_two_seconds() {
        let sleeper = MockSleeper::new();
        let calls = Cell::new(0u32);

        let outcome = executor(policy(3), &sleeper).run_with_outcome(|| {
            let n = calls.get();
            calls.set(n + 1);
            if n < 2 {
                Err(TestError::Transient("500"))
            } else {
                Ok("payload")
            }
        });

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.total_delay, Duration::from_secs(3));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(outcome.into_result().expect("should succeed"), "payload");
    }

    #[test]
    fn test_jitter_source_is_used_for_sleeps() {
        let sleeper = MockSleeper::new();
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .base_delay(Duration::from_secs(1))
            .jitter(true)
            .build()
            .expect("valid policy");
        let executor = executor(policy, &sleeper).with_jitter_source(Arc::new(FixedJitter(0.5)));

        let _ = executor.run(|| -> Result<(), _> { Err(TestError::Transient("x")) });

        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(1500), Duration::from_secs(3)]);
    }

    #[test]
    fn test_delay_hint_overrides_backoff() {
        let sleeper = MockSleeper::new();
        let executor = executor(policy(2), &sleeper).with_delay_hint(|e: &TestError| match e {
            TestError::Transient("slow down") => Some(Duration::from_secs(7)),
            _ => None,
        });
        let calls = Cell::new(0u32);

        let result = executor.run(|| {
            let n = calls.get();
            calls.set(n + 1);
            match n {
                0 => Err(TestError::Transient("slow down")),
                1 => Err(TestError::Transient("other")),
                _ => Ok(()),
            }
        });

        assert!(result.is_ok());
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(7), Duration::from_secs(2)]);
    }

    #[test]
    fn test_delay_hint_is_capped_at_max_delay() {
        let sleeper = MockSleeper::new();
        let executor = executor(policy(2), &sleeper)
            .with_delay_hint(|_: &TestError| Some(Duration::from_secs(86_400)));
        let calls = Cell::new(0u32);

        let result = executor.run(|| {
            let n = calls.get();
            calls.set(n + 1);
            if n == 0 {
                Err(TestError::Transient("slow down"))
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(30)]);
    }

    /// Validates that the optional deadline stops a sequence whose next
    /// backoff would overrun it.
    ///
    /// Assertions:
    /// - Only the 1s and 2s backoffs fit under a 5s deadline.
    /// - The error reports 3 attempts and carries the last failure.
    #[test]
    fn test_deadline_bounds_retry_sequence() {
        let clock = MockClock::new();
        let sleeper = MockSleeper::advancing(clock.clone());
        let policy = RetryPolicy::builder()
            .max_retries(10)
            .base_delay(Duration::from_secs(1))
            .no_jitter()
            .max_elapsed(Duration::from_secs(5))
            .build()
            .expect("valid policy");
        let executor = executor(policy, &sleeper).with_clock(Arc::new(clock));

        let err = executor
            .run(|| -> Result<(), _> { Err(TestError::Transient("down")) })
            .expect_err("deadline should stop the loop");

        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
        match err {
            RetryError::DeadlineExceeded { attempts, deadline, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(deadline, Duration::from_secs(5));
                assert_eq!(source, TestError::Transient("down"));
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_during_backoff() {
        let token = CancellationToken::new();
        let sleeper = MockSleeper::new().with_cancellation(token.clone());
        let calls = Cell::new(0u32);

        let err = executor(policy(5), &sleeper)
            .run(|| -> Result<(), _> {
                calls.set(calls.get() + 1);
                if calls.get() == 2 {
                    token.cancel();
                }
                Err(TestError::Transient("down"))
            })
            .expect_err("should be cancelled");

        assert_eq!(calls.get(), 2);
        assert!(matches!(err, RetryError::Cancelled { attempts: 2, last_error: Some(_) }));
    }

    #[test]
    fn test_cancelled_before_start_never_invokes() {
        let token = CancellationToken::new();
        token.cancel();
        let sleeper = MockSleeper::new().with_cancellation(token);
        let calls = Cell::new(0u32);

        let err = executor(policy(3), &sleeper)
            .run(|| -> Result<(), TestError> {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .expect_err("should be cancelled");

        assert_eq!(calls.get(), 0);
        assert!(matches!(err, RetryError::Cancelled { attempts: 0, last_error: None }));
    }

    #[test]
    fn test_metrics_accumulate_across_runs() {
        let sleeper = MockSleeper::new();
        let executor = executor(policy(2), &sleeper);

        let _ = executor.run(|| Ok::<_, TestError>(()));
        let _ = executor.run(|| -> Result<(), _> { Err(TestError::Transient("x")) });
        let _ = executor.run(|| -> Result<(), _> { Err(TestError::Permanent("x")) });

        let snapshot = executor.metrics();
        assert_eq!(snapshot.total_operations, 3);
        assert_eq!(snapshot.successful_operations, 1);
        assert_eq!(snapshot.failed_operations, 2);
        assert_eq!(snapshot.total_retry_attempts, 2);
        assert_eq!(snapshot.total_delay, Duration::from_secs(3));
        assert_eq!(snapshot.average_retry_delay(), Duration::from_millis(1500));
        assert!((snapshot.success_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_shared_metrics_and_reset() {
        let metrics = Arc::new(RetryMetrics::new());
        let sleeper = MockSleeper::new();
        let first = executor(policy(1), &sleeper).with_metrics(Arc::clone(&metrics));
        let second = executor(policy(1), &sleeper).with_metrics(Arc::clone(&metrics));

        let _ = first.run(|| Ok::<_, TestError>(()));
        let _ = second.run(|| Ok::<_, TestError>(()));
        assert_eq!(metrics.snapshot().total_operations, 2);

        metrics.reset();
        assert_eq!(metrics.snapshot(), RetryMetricsSnapshot::default());
        assert_eq!(RetryMetricsSnapshot::default().success_rate(), 0.0);
    }

    #[test]
    fn test_add_retry_condition_extends_predicates() {
        let mut executor: RetryExecutor<TestError> = RetryExecutor::new(policy(1));
        assert!(!executor.should_retry(&TestError::Permanent("x")));

        executor.add_retry_condition(|e| matches!(e, TestError::Permanent(_)));
        assert!(executor.should_retry(&TestError::Permanent("x")));
        assert!(!executor.should_retry(&TestError::Transient("x")));
    }

    #[test]
    fn test_retry_with_policy_helper() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .no_jitter()
            .build()
            .expect("valid policy");

        let result = retry_with_policy(
            policy,
            |e: &TestError| matches!(e, TestError::Transient(_)),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 2 {
                    Err(TestError::Transient("x"))
                } else {
                    Ok(calls.get())
                }
            },
        );

        assert_eq!(result.expect("should succeed"), 2);
    }

    #[test]
    fn test_error_display_includes_cause() {
        let err: RetryError<TestError> = RetryError::MaxRetriesExceeded {
            attempts: 4,
            reason: StopReason::Exhausted,
            source: TestError::Transient("boom"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("4 attempt"));
        assert!(rendered.contains("transient: boom"));
    }
}
