//! Time abstraction shared by the breaker, the retry executor and the token
//! cache.
//!
//! Production code runs on [`SystemClock`]; tests drive `MockClock` (feature
//! `test-utils`) by hand so
//! recovery windows, retry deadlines and token expiry can be asserted without
//! waiting on the wall clock.

use std::sync::Arc;
#[cfg(any(test, feature = "test-utils"))]
use std::time::Duration;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[cfg(any(test, feature = "test-utils"))]
use parking_lot::Mutex;

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic instant, used for elapsed-time arithmetic.
    fn now(&self) -> Instant;

    /// Current wall-clock time, used for token claims.
    fn system_time(&self) -> SystemTime;

    /// Whole seconds since the UNIX epoch.
    fn epoch_seconds(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }

    /// Milliseconds since the UNIX epoch.
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Both views of time move together: `now()` is the construction instant plus
/// the elapsed offset, and `system_time()` is `UNIX_EPOCH` plus the same
/// offset. Setting the offset to 1000 seconds therefore makes
/// `epoch_seconds()` return `1000`. Clones share the offset.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockClock {
    /// Create a mock clock with zero elapsed time.
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Create a mock clock whose wall-clock view starts at `secs` after the
    /// epoch.
    pub fn at_epoch_secs(secs: u64) -> Self {
        let clock = Self::new();
        clock.set_elapsed(Duration::from_secs(secs));
        clock
    }

    /// Move time forward.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Move time forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Set the elapsed offset directly.
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Current elapsed offset.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.elapsed()
    }
}
