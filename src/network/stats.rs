//! Run-wide packet counters.
//!
//! The capture loop is the only writer; the status line, the final report
//! and the control plane read snapshots through [`StatsCollector::report`].

use chrono::{DateTime, Local};
use log::info;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    processed: u64,
    throttled: u64,
    dropped: u64,
}

/// Thread-safe counters for processed, throttled and dropped packets.
#[derive(Debug)]
pub struct StatsCollector {
    counters: RwLock<Counters>,
    start_time: Instant,
    started_at: DateTime<Local>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Creates a collector whose runtime is measured from `start_time`.
    pub fn starting_at(start_time: Instant) -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
            start_time,
            started_at: Local::now(),
        }
    }

    // Counters are plain integers, a poisoned lock still holds valid data.
    fn read(&self) -> RwLockReadGuard<'_, Counters> {
        self.counters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Counters> {
        self.counters.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts a received packet and returns the new total.
    pub fn record_processed(&self) -> u64 {
        let mut counters = self.write();
        counters.processed += 1;
        counters.processed
    }

    pub fn record_throttled(&self) {
        self.write().throttled += 1;
    }

    pub fn record_dropped(&self) {
        self.write().dropped += 1;
    }

    pub fn processed(&self) -> u64 {
        self.read().processed
    }

    pub fn throttled(&self) -> u64 {
        self.read().throttled
    }

    pub fn dropped(&self) -> u64 {
        self.read().dropped
    }

    /// Wall-clock time the collector was created.
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Snapshot of the counters with runtime measured up to now.
    pub fn report(&self) -> StatsReport {
        self.report_at(Instant::now())
    }

    /// Snapshot of the counters with runtime measured up to `now`.
    pub fn report_at(&self, now: Instant) -> StatsReport {
        let counters = *self.read();
        let runtime = now.saturating_duration_since(self.start_time);
        let elapsed = runtime.as_secs_f64();
        let packets_per_second = if elapsed > 0.0 {
            counters.processed as f64 / elapsed
        } else {
            0.0
        };

        StatsReport {
            processed: counters.processed,
            throttled: counters.throttled,
            dropped: counters.dropped,
            packets_per_second,
            runtime,
            started_at: self.started_at,
        }
    }
}

/// Point-in-time statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub processed: u64,
    pub throttled: u64,
    pub dropped: u64,
    /// `processed / runtime`, or 0 when no time has elapsed
    pub packets_per_second: f64,
    pub runtime: Duration,
    pub started_at: DateTime<Local>,
}

impl StatsReport {
    /// Writes the end-of-run statistics block to the log.
    pub fn log_final(&self) {
        info!("Final Statistics:");
        info!("Started at: {}", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        info!("Total packets processed: {}", self.processed);
        info!("Total packets throttled: {}", self.throttled);
        info!("Total packets dropped: {}", self.dropped);
        info!("Average packets/second: {:.2}", self.packets_per_second);
        info!("Total runtime: {:.1} seconds", self.runtime.as_secs_f64());
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} throttled={} dropped={} pps={:.2} runtime={:.1}s",
            self.processed,
            self.throttled,
            self.dropped,
            self.packets_per_second,
            self.runtime.as_secs_f64()
        )
    }
}
