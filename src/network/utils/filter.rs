//! Capture-filter construction and the open-time escalation ladder.

use std::collections::BTreeSet;
use std::fmt;

use log::{error, info, warn};

use crate::error::{Result, ThrottlerError};
use crate::network::core::handle::{CaptureBackend, CaptureError, HandleConfig};

/// Above this many ports a precise filter is considered too complex.
pub const MAX_LISTED_PORTS: usize = 20;

/// Port count of the truncated filter tried after a rejection.
pub const FALLBACK_PORT_COUNT: usize = 5;

/// A WinDivert filter in structured form.
///
/// `Display` renders the exact expression handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFilter {
    /// Traffic whose source or destination port is one of these
    Ports(Vec<u16>),
    /// Traffic whose destination port lies in `start..=end`
    PortRange { start: u16, end: u16 },
    /// All TCP and UDP traffic
    AllTcpUdp,
}

impl CaptureFilter {
    pub fn is_precise(&self) -> bool {
        matches!(self, CaptureFilter::Ports(_))
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureFilter::Ports(_) => "precise",
            CaptureFilter::PortRange { .. } => "port range",
            CaptureFilter::AllTcpUdp => "basic",
        }
    }
}

impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFilter::Ports(ports) => {
                let conditions = ports
                    .iter()
                    .map(|p| {
                        format!(
                            "tcp.SrcPort == {p} or tcp.DstPort == {p} or udp.SrcPort == {p} or udp.DstPort == {p}"
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" or ");
                write!(f, "(tcp or udp) and ({})", conditions)
            }
            CaptureFilter::PortRange { start, end } => write!(
                f,
                "(tcp or udp) and ((tcp.DstPort >= {start} and tcp.DstPort <= {end}) or (udp.DstPort >= {start} and udp.DstPort <= {end}))"
            ),
            CaptureFilter::AllTcpUdp => write!(f, "tcp or udp"),
        }
    }
}

/// Turns a target's port set into a capture filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterBuilder {
    range_start: u16,
    range_end: u16,
}

impl FilterBuilder {
    /// `start..=end` is the destination range used when no precise filter fits.
    pub fn new(range_start: u16, range_end: u16) -> Self {
        Self {
            range_start,
            range_end,
        }
    }

    /// Precise filter for 1..=20 ports, the fallback range otherwise.
    pub fn build(&self, ports: &BTreeSet<u16>) -> CaptureFilter {
        if !ports.is_empty() && ports.len() <= MAX_LISTED_PORTS {
            CaptureFilter::Ports(ports.iter().copied().collect())
        } else {
            self.range()
        }
    }

    pub fn range(&self) -> CaptureFilter {
        CaptureFilter::PortRange {
            start: self.range_start,
            end: self.range_end,
        }
    }

    /// The lowest [`FALLBACK_PORT_COUNT`] ports as a precise filter.
    pub fn truncated(&self, ports: &BTreeSet<u16>) -> CaptureFilter {
        CaptureFilter::Ports(ports.iter().copied().take(FALLBACK_PORT_COUNT).collect())
    }
}

/// Opens a capture handle, degrading the filter until one is accepted.
///
/// The rungs are:
/// 1. the primary filter from [`FilterBuilder::build`];
/// 2. the first five ports, only when the primary was precise and the
///    driver rejected the expression;
/// 3. `tcp or udp`, after any failure.
///
/// A rung whose expression equals one already tried is skipped. When every
/// rung fails the last error is returned.
///
/// # Arguments
///
/// * `backend` - Capture backend to open handles with
/// * `builder` - Filter builder holding the fallback port range
/// * `ports` - Local ports of the target process, possibly empty
/// * `base` - Handle settings; only the filter is replaced per rung
///
/// # Returns
///
/// * `Ok((handle, filter))` - The open handle and the filter in effect
/// * `Err(ThrottlerError::FilterRejected | CaptureOpen)` - The last
///   rung's error, if every rung failed
pub fn open_with_escalation<B: CaptureBackend>(
    backend: &B,
    builder: &FilterBuilder,
    ports: &BTreeSet<u16>,
    base: &HandleConfig,
) -> Result<(B::Handle, CaptureFilter)> {
    let primary = builder.build(ports);
    let mut tried: Vec<String> = Vec::new();

    let mut last_error = match open_rung(backend, base, &primary, &mut tried) {
        Ok(handle) => {
            info!("Packet capture started successfully");
            return Ok((handle, primary));
        }
        Err(e) => e,
    };

    if primary.is_precise() && last_error.is_filter_rejection() {
        info!("Complex filter failed, trying simpler approach...");
        let simplified = builder.truncated(ports);
        if !tried.contains(&simplified.to_string()) {
            match open_rung(backend, base, &simplified, &mut tried) {
                Ok(handle) => {
                    info!("Packet capture started with simplified filter");
                    return Ok((handle, simplified));
                }
                Err(e) => {
                    error!("Simplified filter also failed: {}", e);
                    last_error = e;
                }
            }
        }
    }

    let basic = CaptureFilter::AllTcpUdp;
    if !tried.contains(&basic.to_string()) {
        match open_rung(backend, base, &basic, &mut tried) {
            Ok(handle) => {
                warn!("Packet capture started with basic filter; all TCP/UDP traffic is shaped");
                return Ok((handle, basic));
            }
            Err(e) => {
                error!("Even basic filter failed: {}", e);
                last_error = e;
            }
        }
    }

    Err(ThrottlerError::from(last_error))
}

/// Opens one rung and records its expression as tried.
fn open_rung<B: CaptureBackend>(
    backend: &B,
    base: &HandleConfig,
    filter: &CaptureFilter,
    tried: &mut Vec<String>,
) -> std::result::Result<B::Handle, CaptureError> {
    let expression = filter.to_string();
    info!("Trying {} filter: {}", filter.kind(), expression);

    let config = HandleConfig {
        filter: expression.clone(),
        ..base.clone()
    };
    tried.push(expression);

    backend.open(&config).inspect_err(|e| error!("Packet capture error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::core::mock::MockBackend;

    fn ports(range: std::ops::RangeInclusive<u16>) -> BTreeSet<u16> {
        range.collect()
    }

    fn rejected() -> std::result::Result<(), CaptureError> {
        Err(CaptureError::FilterRejected("The parameter is incorrect.".into()))
    }

    #[test]
    fn test_precise_filter_expression() {
        let builder = FilterBuilder::new(49000, 65000);
        let filter = builder.build(&BTreeSet::from([443, 80]));

        assert_eq!(
            filter.to_string(),
            "(tcp or udp) and (tcp.SrcPort == 80 or tcp.DstPort == 80 or udp.SrcPort == 80 or udp.DstPort == 80 or tcp.SrcPort == 443 or tcp.DstPort == 443 or udp.SrcPort == 443 or udp.DstPort == 443)"
        );
    }

    #[test]
    fn test_range_filter_expression() {
        let builder = FilterBuilder::new(49000, 65000);
        let filter = builder.build(&BTreeSet::new());

        assert_eq!(filter, CaptureFilter::PortRange { start: 49000, end: 65000 });
        assert_eq!(
            filter.to_string(),
            "(tcp or udp) and ((tcp.DstPort >= 49000 and tcp.DstPort <= 65000) or (udp.DstPort >= 49000 and udp.DstPort <= 65000))"
        );
    }

    #[test]
    fn test_twenty_ports_precise_twenty_one_range() {
        let builder = FilterBuilder::new(49000, 65000);

        let twenty = builder.build(&ports(1000..=1019));
        assert!(twenty.is_precise());
        for port in 1000..=1019 {
            assert!(twenty.to_string().contains(&format!("tcp.SrcPort == {port} ")));
        }

        let twenty_one = builder.build(&ports(1000..=1020));
        assert!(!twenty_one.is_precise());
        assert!(!twenty_one.to_string().contains("1000"));
    }

    #[test]
    fn test_truncated_keeps_lowest_five() {
        let builder = FilterBuilder::new(1, 2);
        let filter = builder.truncated(&BTreeSet::from([9000, 10, 30, 20, 50, 40]));
        assert_eq!(filter, CaptureFilter::Ports(vec![10, 20, 30, 40, 50]));
    }

    #[test]
    fn test_primary_filter_opens() {
        let backend = MockBackend::default();
        let builder = FilterBuilder::new(49000, 65000);
        let target = BTreeSet::from([5000]);

        let (_handle, filter) =
            open_with_escalation(&backend, &builder, &target, &HandleConfig::default()).unwrap();

        assert_eq!(filter, CaptureFilter::Ports(vec![5000]));
        assert_eq!(backend.attempted_filters().len(), 1);
    }

    #[test]
    fn test_escalation_order_then_error() {
        let backend = MockBackend::default().script_opens(vec![rejected(), rejected(), rejected()]);
        let builder = FilterBuilder::new(49000, 65000);
        let target = ports(1000..=1009);

        let result = open_with_escalation(&backend, &builder, &target, &HandleConfig::default());

        assert!(matches!(result, Err(ThrottlerError::FilterRejected(_))));
        let attempts = backend.attempted_filters();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0], builder.build(&target).to_string());
        assert_eq!(
            attempts[1],
            CaptureFilter::Ports(vec![1000, 1001, 1002, 1003, 1004]).to_string()
        );
        assert_eq!(attempts[2], "tcp or udp");
    }

    #[test]
    fn test_simplified_filter_recovers() {
        let backend = MockBackend::default().script_opens(vec![rejected()]);
        let builder = FilterBuilder::new(49000, 65000);
        let target = ports(1000..=1009);

        let (_handle, filter) =
            open_with_escalation(&backend, &builder, &target, &HandleConfig::default()).unwrap();

        assert_eq!(filter, CaptureFilter::Ports(vec![1000, 1001, 1002, 1003, 1004]));
        assert_eq!(backend.attempted_filters().len(), 2);
    }

    #[test]
    fn test_non_filter_failure_skips_truncation() {
        let backend = MockBackend::default()
            .script_opens(vec![Err(CaptureError::Open("access denied".into()))]);
        let builder = FilterBuilder::new(49000, 65000);
        let target = ports(1000..=1009);

        let (_handle, filter) =
            open_with_escalation(&backend, &builder, &target, &HandleConfig::default()).unwrap();

        assert_eq!(filter, CaptureFilter::AllTcpUdp);
        assert_eq!(backend.attempted_filters().len(), 2);
    }

    #[test]
    fn test_range_primary_goes_straight_to_basic() {
        let backend = MockBackend::default().script_opens(vec![rejected()]);
        let builder = FilterBuilder::new(49000, 65000);

        let (_handle, filter) =
            open_with_escalation(&backend, &builder, &BTreeSet::new(), &HandleConfig::default())
                .unwrap();

        assert_eq!(filter, CaptureFilter::AllTcpUdp);
        let attempts = backend.attempted_filters();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].contains("tcp.DstPort >= 49000"));
    }

    #[test]
    fn test_duplicate_rung_is_skipped() {
        let backend = MockBackend::default().script_opens(vec![rejected(), rejected()]);
        let builder = FilterBuilder::new(49000, 65000);
        // Three ports: the truncated filter equals the primary one.
        let target = BTreeSet::from([1, 2, 3]);

        let result = open_with_escalation(&backend, &builder, &target, &HandleConfig::default());

        assert!(result.is_err());
        assert_eq!(backend.attempted_filters().len(), 2);
        assert_eq!(backend.attempted_filters()[1], "tcp or udp");
    }
}
