//! Trait definitions for the throughput governors.
//!
//! The pipeline only ever sees a `dyn RateGovernor`; whether it is the plain
//! sliding-window limiter or the adaptive wrapper is decided once, when the
//! run is set up.

use crate::error::Result;
use crate::network::modules::bandwidth::LimiterSnapshot;

/// A throughput governor that delays, but never rejects, traffic.
pub trait RateGovernor: Send + Sync {
    /// Returns the unique name identifier for this governor
    fn name(&self) -> &'static str;

    /// Accounts for `packet_size` bytes, blocking the caller for as long as
    /// needed to keep long-run throughput under the configured capacity.
    fn throttle(&self, packet_size: usize) -> Result<()>;

    /// Non-blocking advisory check against the token bucket only.
    ///
    /// This is a different admission criterion from the window accounting
    /// that `throttle` enforces; a `true` here does not mean `throttle`
    /// will return without waiting.
    fn can_send(&self, packet_size: usize) -> bool;

    /// Throughput of the current window in KB/s (0 for an empty window).
    fn current_rate_kbps(&self) -> f64;

    /// Replaces the capacity (bytes/s) without resetting the window.
    fn update_rate_limit(&self, bytes_per_second: f64) -> Result<()>;

    /// Consistent copy of the limiter state.
    fn snapshot(&self) -> LimiterSnapshot;
}
