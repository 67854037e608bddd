use std::time::{Duration, Instant};

/// Raw bytes of a captured packet, as exposed by a capture backend.
///
/// Implemented for the WinDivert packet type on Windows and for plain
/// byte vectors so the pipeline can be driven without a driver.
pub trait CapturedPacket {
    /// The raw packet bytes (IP header included)
    fn data(&self) -> &[u8];

    /// Packet length in bytes
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Whether the packet carries no bytes at all
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CapturedPacket for Vec<u8> {
    fn data(&self) -> &[u8] {
        self
    }
}

/// Represents a network packet with metadata for processing.
///
/// This structure wraps a captured packet and associates it with
/// the time it was received, which the status and debug output use
/// to report how long shaping held a packet.
#[derive(Debug, Clone)]
pub struct PacketData<P> {
    /// The captured packet, handed back to the backend for re-injection
    pub packet: P,

    /// Timestamp when the packet was captured
    pub arrival_time: Instant,
}

impl<P: CapturedPacket> From<P> for PacketData<P> {
    /// Wraps a packet, recording the current time as arrival time.
    fn from(packet: P) -> Self {
        PacketData {
            packet,
            arrival_time: Instant::now(),
        }
    }
}

impl<P: CapturedPacket> PacketData<P> {
    /// Returns the size of the packet in bytes
    pub fn size(&self) -> usize {
        self.packet.len()
    }

    /// Returns the time elapsed since the packet was captured
    pub fn age(&self) -> Duration {
        self.arrival_time.elapsed()
    }
}
