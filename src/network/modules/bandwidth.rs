use crate::error::{Result, ThrottlerError};
use crate::network::core::clock::{Clock, SystemClock};
use crate::network::modules::traits::RateGovernor;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Length of the accounting window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time copy of the limiter state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSnapshot {
    /// Configured maximum bytes per second
    pub capacity: f64,
    /// Tokens currently in the bucket (0..=capacity)
    pub tokens: f64,
    /// Bytes accounted in the current window
    pub bytes_sent_in_window: u64,
    /// Time since the current window opened
    pub window_elapsed: Duration,
    /// Window throughput in KB/s
    pub current_rate_kbps: f64,
    /// Window throughput in Mbps
    pub current_rate_mbps: f64,
    /// `bytes_sent_in_window / capacity`
    pub window_utilization: f64,
}

#[derive(Debug)]
struct LimiterState {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    window_start: Instant,
    bytes_sent_in_window: u64,
}

impl LimiterState {
    /// Adds tokens for the time since the last refill, capped at capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.capacity).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Starts a fresh window once the current one has run its course.
    fn roll_window(&mut self, now: Instant, window_size: Duration) {
        if now.saturating_duration_since(self.window_start) >= window_size {
            self.window_start = now;
            self.bytes_sent_in_window = 0;
        }
    }

    fn rate_kbps(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        if elapsed > 0.0 {
            return (self.bytes_sent_in_window as f64 / elapsed) / 1024.0;
        }
        0.0
    }
}

/// Sliding-window throughput governor with an advisory token bucket.
///
/// `throttle` never refuses a packet. When the bytes accounted in the
/// current window would exceed one second's worth of capacity, the caller
/// sleeps until the window ends and a new window starts. Bursts of up to a
/// full window are therefore let through immediately.
///
/// All state sits behind one mutex, and the window wait happens while
/// holding it, so concurrent callers are serialized.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    window_size: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("state", &self.state)
            .field("window_size", &self.window_size)
            .finish()
    }
}

fn validate_capacity(bytes_per_second: f64) -> Result<()> {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return Err(ThrottlerError::InvalidArgument(format!(
            "rate limit must be a positive number of bytes per second, got {}",
            bytes_per_second
        )));
    }
    Ok(())
}

impl RateLimiter {
    /// Creates a limiter on the system clock with a one-second window.
    ///
    /// # Arguments
    ///
    /// * `bytes_per_second` - Capacity; also the initial bucket fill
    ///
    /// # Returns
    ///
    /// * `Err(ThrottlerError::InvalidArgument)` - If the capacity is not a
    ///   positive finite number
    pub fn new(bytes_per_second: f64) -> Result<Self> {
        Self::with_clock(bytes_per_second, DEFAULT_WINDOW, Arc::new(SystemClock))
    }

    /// Creates a limiter with an explicit window size and time source.
    ///
    /// # Arguments
    ///
    /// * `bytes_per_second` - Capacity; also the initial bucket fill
    /// * `window_size` - Length of one accounting window, must be non-zero
    /// * `clock` - Time source for refills, window rolls and waits
    pub fn with_clock(
        bytes_per_second: f64,
        window_size: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_capacity(bytes_per_second)?;
        if window_size.is_zero() {
            return Err(ThrottlerError::InvalidArgument(
                "window size must be greater than zero".into(),
            ));
        }

        let now = clock.now();
        info!("RateLimiter initialized: {} bytes/sec", bytes_per_second);

        Ok(Self {
            state: Mutex::new(LimiterState {
                capacity: bytes_per_second,
                tokens: bytes_per_second,
                last_refill: now,
                window_start: now,
                bytes_sent_in_window: 0,
            }),
            window_size,
            clock,
        })
    }

    /// Limiter state only holds numbers that are valid after every
    /// statement, so a panic elsewhere never leaves it inconsistent.
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// The clock this limiter measures time with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Window throughput in Mbps.
    pub fn current_rate_mbps(&self) -> f64 {
        (RateGovernor::current_rate_kbps(self) * 8.0) / 1024.0
    }

    /// Refills the bucket and starts a new, empty window.
    pub fn reset(&self) {
        let mut state = self.lock();
        let now = self.clock.now();
        state.tokens = state.capacity;
        state.last_refill = now;
        state.window_start = now;
        state.bytes_sent_in_window = 0;
        debug!("RateLimiter reset");
    }
}

impl RateGovernor for RateLimiter {
    fn name(&self) -> &'static str {
        "window"
    }

    fn throttle(&self, packet_size: usize) -> Result<()> {
        let mut state = self.lock();
        let now = self.clock.now();

        state.refill(now);
        state.roll_window(now, self.window_size);

        let size = packet_size as u64;
        if (state.bytes_sent_in_window + size) as f64 > state.capacity {
            let elapsed = now.saturating_duration_since(state.window_start);
            if let Some(remaining) = self.window_size.checked_sub(elapsed) {
                if !remaining.is_zero() {
                    debug!(
                        "Throttling: waiting {:.3}s for {} bytes",
                        remaining.as_secs_f64(),
                        packet_size
                    );
                    self.clock.sleep(remaining);

                    state.window_start = self.clock.now();
                    state.bytes_sent_in_window = 0;
                }
            }
        }

        state.bytes_sent_in_window += size;
        Ok(())
    }

    fn can_send(&self, packet_size: usize) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();
        state.refill(now);
        state.tokens >= packet_size as f64
    }

    fn current_rate_kbps(&self) -> f64 {
        let state = self.lock();
        state.rate_kbps(self.clock.now())
    }

    fn update_rate_limit(&self, bytes_per_second: f64) -> Result<()> {
        validate_capacity(bytes_per_second)?;

        let mut state = self.lock();
        state.capacity = bytes_per_second;
        if state.tokens > bytes_per_second {
            state.tokens = bytes_per_second;
        }

        info!("Rate limit updated to {:.0} bytes/sec", bytes_per_second);
        Ok(())
    }

    fn snapshot(&self) -> LimiterSnapshot {
        let state = self.lock();
        let now = self.clock.now();
        let current_rate_kbps = state.rate_kbps(now);

        LimiterSnapshot {
            capacity: state.capacity,
            tokens: state.tokens,
            bytes_sent_in_window: state.bytes_sent_in_window,
            window_elapsed: now.saturating_duration_since(state.window_start),
            current_rate_kbps,
            current_rate_mbps: (current_rate_kbps * 8.0) / 1024.0,
            window_utilization: state.bytes_sent_in_window as f64 / state.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::core::clock::ManualClock;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn manual_limiter(bytes_per_second: f64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            RateLimiter::with_clock(bytes_per_second, DEFAULT_WINDOW, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_burst_within_window_does_not_wait() {
        let (limiter, clock) = manual_limiter(10_000.0);

        for _ in 0..10 {
            limiter.throttle(1000).unwrap();
        }

        assert_eq!(clock.total_slept(), Duration::ZERO);
        assert_eq!(limiter.snapshot().bytes_sent_in_window, 10_000);
    }

    #[test]
    fn test_exceeding_window_waits_for_remaining_time() {
        let (limiter, clock) = manual_limiter(10_000.0);

        for _ in 0..10 {
            limiter.throttle(1000).unwrap();
        }
        clock.advance(Duration::from_millis(300));
        limiter.throttle(1000).unwrap();

        assert_eq!(clock.total_slept(), Duration::from_millis(700));
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.bytes_sent_in_window, 1000);
        assert_eq!(snapshot.window_elapsed, Duration::ZERO);
    }

    #[test]
    fn test_window_rolls_over_after_window_size() {
        let (limiter, clock) = manual_limiter(10_000.0);

        limiter.throttle(9000).unwrap();
        clock.advance(Duration::from_secs(1));
        limiter.throttle(9000).unwrap();

        assert_eq!(clock.total_slept(), Duration::ZERO);
        assert_eq!(limiter.snapshot().bytes_sent_in_window, 9000);
    }

    #[test]
    fn test_window_never_exceeds_capacity_without_waiting() {
        let (limiter, clock) = manual_limiter(50_000.0);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..5_000 {
            let slept_before = clock.total_slept();
            let size = rng.random_range(1..=50_000usize);
            clock.advance(Duration::from_micros(rng.random_range(0..20_000)));

            limiter.throttle(size).unwrap();

            if clock.total_slept() == slept_before {
                let snapshot = limiter.snapshot();
                assert!(
                    snapshot.bytes_sent_in_window as f64 <= snapshot.capacity,
                    "window holds {} bytes, capacity {}",
                    snapshot.bytes_sent_in_window,
                    snapshot.capacity
                );
            }
        }
    }

    #[test]
    fn test_long_run_throughput_converges_to_capacity() {
        let capacity = 125_000.0;
        let (limiter, clock) = manual_limiter(capacity);
        let packets = 10_000;
        let packet_size = 1000;

        for _ in 0..packets {
            limiter.throttle(packet_size).unwrap();
        }

        let total_bytes = (packets * packet_size) as f64;
        let rate = total_bytes / clock.elapsed().as_secs_f64();
        let deviation = (rate - capacity).abs() / capacity;
        assert!(deviation < 0.02, "rate {rate:.0} B/s deviates {deviation:.4}");
    }

    #[test]
    fn test_can_send_is_independent_of_window_accounting() {
        let (limiter, clock) = manual_limiter(1000.0);

        assert!(limiter.can_send(1000));
        assert!(!limiter.can_send(1001));

        // The window holds 900 bytes; the bucket is untouched.
        limiter.throttle(900).unwrap();
        assert!(limiter.can_send(1000));
        assert_eq!(limiter.snapshot().tokens, 1000.0);

        clock.advance(Duration::from_millis(950));
        assert!(limiter.can_send(500));

        limiter.throttle(500).unwrap();
        assert_eq!(clock.total_slept(), Duration::from_millis(50));
        assert!(limiter.can_send(1000));
    }

    #[test]
    fn test_full_window_throttle_leaves_bucket_full() {
        let (limiter, clock) = manual_limiter(10_000.0);

        limiter.throttle(10_000).unwrap();

        assert_eq!(clock.total_slept(), Duration::ZERO);
        assert!(limiter.can_send(1));
        assert!(limiter.can_send(10_000));
        assert_eq!(limiter.snapshot().tokens, 10_000.0);
    }

    #[test]
    fn test_current_rate_kbps() {
        let (limiter, clock) = manual_limiter(1_000_000.0);

        limiter.throttle(2048).unwrap();
        assert_eq!(limiter.current_rate_kbps(), 0.0);

        clock.advance(Duration::from_millis(500));
        assert!((limiter.current_rate_kbps() - 4.0).abs() < 1e-9);
        assert!((limiter.current_rate_mbps() - 4.0 * 8.0 / 1024.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_rate_limit_clamps_tokens_and_keeps_window() {
        let (limiter, _clock) = manual_limiter(10_000.0);

        limiter.throttle(4000).unwrap();
        limiter.update_rate_limit(2000.0).unwrap();

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.capacity, 2000.0);
        assert_eq!(snapshot.tokens, 2000.0);
        assert_eq!(snapshot.bytes_sent_in_window, 4000);
        assert_eq!(snapshot.window_utilization, 2.0);
    }

    #[test]
    fn test_invalid_capacity_is_rejected() {
        assert!(matches!(
            RateLimiter::new(0.0),
            Err(ThrottlerError::InvalidArgument(_))
        ));
        assert!(RateLimiter::new(f64::INFINITY).is_err());

        let (limiter, _clock) = manual_limiter(1000.0);
        assert!(matches!(
            limiter.update_rate_limit(-5.0),
            Err(ThrottlerError::InvalidArgument(_))
        ));
        assert!(limiter.update_rate_limit(f64::NAN).is_err());
        assert_eq!(limiter.snapshot().capacity, 1000.0);
    }

    #[test]
    fn test_reset_clears_window() {
        let (limiter, clock) = manual_limiter(10_000.0);

        limiter.throttle(6000).unwrap();
        clock.advance(Duration::from_millis(200));
        limiter.reset();

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.bytes_sent_in_window, 0);
        assert_eq!(snapshot.tokens, 10_000.0);
        assert_eq!(snapshot.window_elapsed, Duration::ZERO);
    }

    #[test]
    fn test_real_clock_blocks_caller() {
        let limiter = RateLimiter::new(20_000.0).unwrap();
        let start = Instant::now();

        for _ in 0..30 {
            limiter.throttle(1000).unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
