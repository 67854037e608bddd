use crate::control::state::ControlState;
use crate::error::Result;
use crate::network::core::clock::{Clock, SystemClock};
use crate::network::core::handle::CaptureHandle;
use crate::network::core::packet_data::PacketData;
use crate::network::modules::delay::LagDelay;
use crate::network::modules::drop::DropPolicy;
use crate::network::modules::traits::RateGovernor;
use crate::network::stats::{StatsCollector, StatsReport};
use crate::network::types::probability::Probability;
use log::{debug, info, trace};
use std::sync::Arc;
use std::time::Duration;

/// What happened to a single packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Discarded by the drop policy; never re-injected
    Dropped,
    /// Rate-limited and delayed, then re-injected
    Shaped,
    /// Throttling was off; re-injected untouched
    Passthrough,
}

/// Per-packet shaping state machine.
///
/// Packets are handled one at a time, in arrival order, on the caller's
/// thread. Every sleep (window wait, fixed delay) blocks the packets
/// behind the current one as well.
pub struct ShapingPipeline {
    governor: Arc<dyn RateGovernor>,
    lag: LagDelay,
    dropper: DropPolicy,
    control: Arc<ControlState>,
    stats: Arc<StatsCollector>,
    status_interval: u64,
    status_lines: u64,
    last_status: Option<StatsReport>,
}

impl ShapingPipeline {
    /// Creates a pipeline with no delay, no packet loss and a status line
    /// every 100 packets.
    pub fn new(
        governor: Arc<dyn RateGovernor>,
        control: Arc<ControlState>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            governor,
            lag: LagDelay::new(Duration::ZERO, Arc::new(SystemClock)),
            dropper: DropPolicy::new(Probability::NEVER),
            control,
            stats,
            status_interval: 100,
            status_lines: 0,
            last_status: None,
        }
    }

    /// Fixed delay applied to every shaped packet.
    pub fn with_lag(mut self, delay: Duration, clock: Arc<dyn Clock>) -> Self {
        self.lag = LagDelay::new(delay, clock);
        self
    }

    pub fn with_drop_policy(mut self, dropper: DropPolicy) -> Self {
        self.dropper = dropper;
        self
    }

    /// Emits a status line every `interval` processed packets.
    pub fn with_status_interval(mut self, interval: u64) -> Self {
        self.status_interval = interval.max(1);
        self
    }

    pub fn governor(&self) -> &Arc<dyn RateGovernor> {
        &self.governor
    }

    /// Number of status lines logged so far.
    pub fn status_lines(&self) -> u64 {
        self.status_lines
    }

    /// Counters as of the most recent status line.
    pub fn last_status(&self) -> Option<&StatsReport> {
        self.last_status.as_ref()
    }

    /// Pulls packets from `handle` until shutdown is requested or the
    /// capture stream ends.
    ///
    /// Shutdown is checked before every receive and again right after it;
    /// a packet received after the request is not re-injected. The handle's
    /// receive interrupt is registered with the control state for the
    /// duration of the loop, so a shutdown request also ends a receive that
    /// is waiting for traffic.
    pub fn run<H: CaptureHandle>(&mut self, handle: &mut H) -> Result<()> {
        info!(
            "Packet processing started ({} limiter, drop rate {})",
            self.governor.name(),
            self.dropper.probability()
        );

        self.control.attach_recv_interrupt(handle.recv_interrupt());
        let result = self.pump(handle);
        self.control.detach_recv_interrupt();
        result
    }

    fn pump<H: CaptureHandle>(&mut self, handle: &mut H) -> Result<()> {
        loop {
            if self.control.is_shutting_down() {
                debug!("Shutdown requested, leaving capture loop");
                break;
            }

            let Some(packet) = handle.recv()? else {
                if self.control.is_shutting_down() {
                    debug!("Receive interrupted by shutdown request");
                } else {
                    info!("Capture stream ended");
                }
                break;
            };

            if self.control.is_shutting_down() {
                debug!("Shutdown requested, discarding last received packet");
                break;
            }

            self.process_packet(handle, PacketData::from(packet))?;
        }

        Ok(())
    }

    /// Runs one packet through the state machine and re-injects it unless
    /// it was dropped.
    ///
    /// # Arguments
    ///
    /// * `handle` - Capture handle the packet is re-injected through
    /// * `packet` - The received packet and its arrival time
    ///
    /// # Returns
    ///
    /// * `Ok(PacketOutcome)` - What happened to the packet
    /// * `Err(ThrottlerError::CaptureRuntime)` - If re-injection failed
    ///
    /// A status line is logged whenever the running packet count reaches a
    /// multiple of the status interval, but only for forwarded packets.
    pub fn process_packet<H: CaptureHandle>(
        &mut self,
        handle: &mut H,
        packet: PacketData<H::Packet>,
    ) -> Result<PacketOutcome> {
        let processed = self.stats.record_processed();
        let throttling = self.control.is_throttling_enabled();

        let outcome = if throttling {
            self.stats.record_throttled();

            if self.dropper.should_drop() {
                self.stats.record_dropped();
                trace!("Dropped packet #{} ({} bytes)", processed, packet.size());
                return Ok(PacketOutcome::Dropped);
            }

            self.governor.throttle(packet.size())?;
            self.lag.apply();
            PacketOutcome::Shaped
        } else {
            PacketOutcome::Passthrough
        };

        handle.send(&packet.packet)?;
        trace!(
            "Forwarded packet #{} ({:?}, held {:?})",
            processed,
            outcome,
            packet.age()
        );

        if processed % self.status_interval == 0 {
            self.log_status(throttling);
        }

        Ok(outcome)
    }

    fn log_status(&mut self, throttling: bool) {
        let report = self.stats.report();
        info!(
            "{} | Processed: {} | Throttled: {} | Dropped: {} | Rate: {:.1} KB/s",
            if throttling { "THROTTLING" } else { "NORMAL" },
            report.processed,
            report.throttled,
            report.dropped,
            self.governor.current_rate_kbps()
        );
        self.status_lines += 1;
        self.last_status = Some(report);
    }
}
