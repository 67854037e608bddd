use crate::network::core::clock::Clock;
use log::trace;
use std::sync::Arc;
use std::time::Duration;

/// Fixed per-packet latency applied after the rate limiter.
///
/// The sleep blocks the capture loop, so every packet behind the current one
/// waits too.
pub struct LagDelay {
    delay: Duration,
    clock: Arc<dyn Clock>,
}

impl LagDelay {
    pub fn new(delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { delay, clock }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleeps for the configured delay. A zero delay returns immediately.
    pub fn apply(&self) {
        if self.delay.is_zero() {
            return;
        }
        trace!("Delaying packet by {:?}", self.delay);
        self.clock.sleep(self.delay);
    }
}

impl std::fmt::Debug for LagDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LagDelay").field("delay", &self.delay).finish()
    }
}
