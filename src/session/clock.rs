//! Time source for the session loop.
//!
//! The worker never calls `Instant::now` or sleeps directly; it goes through a
//! `Clock`, so tests can drive iteration spacing and cooldowns with
//! `ManualClock` instead of wall-clock delays.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::cancel::CancelToken;

pub trait Clock: Send + Sync {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Pause for `timeout`, returning early if `cancel` fires.
    /// Returns true when cancelled.
    fn wait(&self, timeout: Duration, cancel: &CancelToken) -> bool;
}

/// Wall-clock implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait(&self, timeout: Duration, cancel: &CancelToken) -> bool {
        if timeout.is_zero() {
            return cancel.is_cancelled();
        }
        cancel.wait_timeout(timeout)
    }
}

/// Virtual clock: `wait` advances time instantly.
///
/// Each wait still yields for a millisecond of real time so a worker driven by
/// this clock does not monopolise a core.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn wait(&self, timeout: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        self.advance(timeout);
        cancel.wait_timeout(Duration::from_millis(1))
    }
}
