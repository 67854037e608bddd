use crate::error::{Result, ThrottlerError};
use crate::network::modules::bandwidth::{LimiterSnapshot, RateLimiter};
use crate::network::modules::traits::RateGovernor;
use log::{debug, info};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Window age after which the capacity is re-evaluated.
pub const ADAPT_INTERVAL: Duration = Duration::from_millis(500);

/// Window utilisation above which the link counts as congested.
pub const CONGESTION_THRESHOLD: f64 = 0.9;

/// Capacity changes smaller than this share of the base rate are ignored.
const MIN_CHANGE_RATIO: f64 = 0.01;

/// How the capacity reacts to congestion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationPolicy {
    factor: f64,
    base_rate: f64,
}

impl AdaptationPolicy {
    pub fn new(factor: f64, base_rate: f64) -> Result<Self> {
        if !(factor > 0.0 && factor < 1.0) {
            return Err(ThrottlerError::InvalidArgument(format!(
                "adaptation factor must be between 0 and 1 (exclusive), got {}",
                factor
            )));
        }
        if !base_rate.is_finite() || base_rate <= 0.0 {
            return Err(ThrottlerError::InvalidArgument(format!(
                "base rate must be positive, got {}",
                base_rate
            )));
        }
        Ok(Self { factor, base_rate })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    /// Proposed capacity given the current one.
    ///
    /// Congestion shrinks the capacity by `factor`; otherwise it grows by a
    /// tenth of `factor`, never past the base rate.
    pub fn next_capacity(&self, capacity: f64, congested: bool) -> f64 {
        if congested {
            capacity * (1.0 - self.factor)
        } else {
            self.base_rate.min(capacity * (1.0 + self.factor * 0.1))
        }
    }

    /// Whether a move from `current` to `proposed` is large enough to apply.
    pub fn is_significant(&self, current: f64, proposed: f64) -> bool {
        (proposed - current).abs() > self.base_rate * MIN_CHANGE_RATIO
    }
}

/// A [`RateLimiter`] that lowers its capacity while the window runs hot and
/// recovers it towards the configured base rate afterwards.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    inner: RateLimiter,
    policy: AdaptationPolicy,
    congested: Mutex<bool>,
}

impl AdaptiveRateLimiter {
    /// Wraps `inner`; its current capacity becomes the base rate.
    ///
    /// # Arguments
    ///
    /// * `inner` - The sliding-window limiter doing the actual accounting
    /// * `factor` - Fraction by which capacity shrinks or grows, in `(0, 1)`
    ///
    /// # Returns
    ///
    /// * `Err(ThrottlerError::InvalidArgument)` - If `factor` is out of range
    pub fn new(inner: RateLimiter, factor: f64) -> Result<Self> {
        let policy = AdaptationPolicy::new(factor, inner.snapshot().capacity)?;
        info!(
            "AdaptiveRateLimiter initialized with adaptation factor {}",
            factor
        );
        Ok(Self {
            inner,
            policy,
            congested: Mutex::new(false),
        })
    }

    pub fn policy(&self) -> &AdaptationPolicy {
        &self.policy
    }

    pub fn is_congested(&self) -> bool {
        *self.congested.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the congestion state and logs transitions.
    fn detect_congestion(&self, snapshot: &LimiterSnapshot) -> bool {
        let high_utilization = snapshot.window_utilization > CONGESTION_THRESHOLD;
        let mut congested = self.congested.lock().unwrap_or_else(PoisonError::into_inner);
        if high_utilization != *congested {
            *congested = high_utilization;
            info!(
                "Congestion {}",
                if high_utilization { "detected" } else { "cleared" }
            );
        }
        high_utilization
    }

    /// Re-evaluates the capacity once the current window is old enough.
    pub fn adapt(&self) -> Result<()> {
        let snapshot = self.inner.snapshot();
        if snapshot.window_elapsed <= ADAPT_INTERVAL {
            return Ok(());
        }

        let congested = self.detect_congestion(&snapshot);
        let proposed = self.policy.next_capacity(snapshot.capacity, congested);
        if self.policy.is_significant(snapshot.capacity, proposed) {
            debug!(
                "Adapting capacity {:.0} -> {:.0} bytes/sec",
                snapshot.capacity, proposed
            );
            self.inner.update_rate_limit(proposed)?;
        }
        Ok(())
    }
}

impl RateGovernor for AdaptiveRateLimiter {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn throttle(&self, packet_size: usize) -> Result<()> {
        self.adapt()?;
        self.inner.throttle(packet_size)
    }

    fn can_send(&self, packet_size: usize) -> bool {
        self.inner.can_send(packet_size)
    }

    fn current_rate_kbps(&self) -> f64 {
        self.inner.current_rate_kbps()
    }

    fn update_rate_limit(&self, bytes_per_second: f64) -> Result<()> {
        self.inner.update_rate_limit(bytes_per_second)
    }

    fn snapshot(&self) -> LimiterSnapshot {
        self.inner.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::core::clock::ManualClock;
    use crate::network::modules::bandwidth::DEFAULT_WINDOW;
    use std::sync::Arc;

    fn adaptive(capacity: f64, factor: f64) -> (AdaptiveRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let inner = RateLimiter::with_clock(capacity, DEFAULT_WINDOW, clock.clone()).unwrap();
        (AdaptiveRateLimiter::new(inner, factor).unwrap(), clock)
    }

    #[test]
    fn test_policy_rejects_bad_factor() {
        assert!(AdaptationPolicy::new(0.0, 1000.0).is_err());
        assert!(AdaptationPolicy::new(1.0, 1000.0).is_err());
        assert!(AdaptationPolicy::new(f64::NAN, 1000.0).is_err());
        assert!(AdaptationPolicy::new(0.5, 0.0).is_err());
        assert!(AdaptationPolicy::new(0.5, 1000.0).is_ok());
    }

    #[test]
    fn test_policy_next_capacity() {
        let policy = AdaptationPolicy::new(0.1, 10_000.0).unwrap();

        assert!((policy.next_capacity(10_000.0, true) - 9_000.0).abs() < 1e-9);
        assert!((policy.next_capacity(9_000.0, false) - 9_090.0).abs() < 1e-9);
        assert_eq!(policy.next_capacity(10_000.0, false), 10_000.0);
    }

    #[test]
    fn test_no_adaptation_in_young_window() {
        let (limiter, clock) = adaptive(10_000.0, 0.1);

        limiter.throttle(9_500).unwrap();
        clock.advance(Duration::from_millis(400));
        limiter.throttle(100).unwrap();

        assert_eq!(limiter.snapshot().capacity, 10_000.0);
        assert!(!limiter.is_congested());
    }

    #[test]
    fn test_congestion_reduces_capacity() {
        let (limiter, clock) = adaptive(10_000.0, 0.1);

        limiter.throttle(9_500).unwrap();
        clock.advance(Duration::from_millis(600));
        limiter.throttle(100).unwrap();

        assert!(limiter.is_congested());
        assert!((limiter.snapshot().capacity - 9_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_recovery_grows_towards_base_rate() {
        let (limiter, clock) = adaptive(10_000.0, 0.5);

        limiter.throttle(9_500).unwrap();
        clock.advance(Duration::from_millis(600));
        limiter.throttle(10).unwrap();
        let reduced = limiter.snapshot().capacity;
        assert!((reduced - 5_000.0).abs() < 1e-6);

        // Quiet window: utilisation drops and the capacity recovers by 5 %.
        clock.advance(Duration::from_millis(600));
        limiter.throttle(10).unwrap();

        assert!(!limiter.is_congested());
        let recovered = limiter.snapshot().capacity;
        assert!((recovered - 5_250.0).abs() < 1e-6);
        assert!(recovered <= limiter.policy().base_rate());
    }

    #[test]
    fn test_small_factor_growth_is_below_change_threshold() {
        let (limiter, clock) = adaptive(10_000.0, 0.1);

        limiter.throttle(9_500).unwrap();
        clock.advance(Duration::from_millis(600));
        limiter.throttle(10).unwrap();
        assert!((limiter.snapshot().capacity - 9_000.0).abs() < 1e-6);

        clock.advance(Duration::from_millis(600));
        limiter.throttle(10).unwrap();

        // 1 % of 9000 never exceeds 1 % of the base rate.
        assert!((limiter.snapshot().capacity - 9_000.0).abs() < 1e-6);
    }
}
