//! Time source used by the limiter and the pipeline.
//!
//! Production code uses [`SystemClock`]. The tests swap in a manual clock
//! that turns every sleep into an instant jump of virtual time.

#[cfg(test)]
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time plus a way to block the caller.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Suspends the calling thread for `duration`. Runs to completion.
    fn sleep(&self, duration: Duration);
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Virtual clock: time only moves on `sleep` or `advance`.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    slept: Mutex<Duration>,
}

#[cfg(test)]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            slept: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves virtual time forward without counting it as a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += duration;
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Total time callers spent in `sleep`.
    pub fn total_slept(&self) -> Duration {
        *self.slept.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        let mut slept = self.slept.lock().unwrap_or_else(|e| e.into_inner());
        *slept += duration;
    }
}
