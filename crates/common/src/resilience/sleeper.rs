//! Blocking, cancellable sleeps for retry backoff.
//!
//! The retry executor never calls `std::thread::sleep` directly. It goes
//! through a [`Sleeper`] so production code can be interrupted by a
//! [`CancellationToken`] and tests can record the requested delays instead of
//! waiting for them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[cfg(any(test, feature = "test-utils"))]
use super::clock::MockClock;

/// Returned when a sleep ends early because its token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sleep interrupted by cancellation")]
pub struct Interrupted;

/// Blocking delay between retry attempts.
pub trait Sleeper: Send + Sync {
    /// Block for `duration`, or until cancelled.
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted>;

    /// Whether the owner has asked for the current work to stop.
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Shared flag that wakes every sleeper waiting on it.
///
/// Cloning yields a handle to the same flag; cancelling is permanent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake all waiters.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Wait up to `duration`. Returns `true` if the token was cancelled
    /// before or during the wait.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        match Instant::now().checked_add(duration) {
            Some(deadline) => {
                while !*cancelled {
                    if self.inner.signal.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*cancelled {
                    self.inner.signal.wait(&mut cancelled);
                }
            }
        }
        *cancelled
    }
}

/// Sleeps on the calling thread, optionally interruptible.
#[derive(Debug, Clone, Default)]
pub struct ThreadSleeper {
    token: Option<CancellationToken>,
}

impl ThreadSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeper that returns early once `token` is cancelled.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self { token: Some(token) }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        match &self.token {
            Some(token) => {
                if token.wait_timeout(duration) {
                    Err(Interrupted)
                } else {
                    Ok(())
                }
            }
            None => {
                std::thread::sleep(duration);
                Ok(())
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Records requested delays instead of sleeping.
///
/// When built with [`MockSleeper::advancing`], each sleep also moves the given
/// [`MockClock`] forward so deadline checks see the elapsed backoff.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct MockSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
    clock: Option<MockClock>,
    token: Option<CancellationToken>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advancing(clock: MockClock) -> Self {
        Self { clock: Some(clock), ..Self::default() }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Every delay requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sleeps.lock().len()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Sleeper for MockSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            return Err(Interrupted);
        }
        self.sleeps.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
