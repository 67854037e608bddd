//! Capture handle abstraction.
//!
//! The pipeline never talks to a driver directly: it opens a handle through
//! a [`CaptureBackend`], pulls packets from the [`CaptureHandle`] and hands
//! the ones it keeps back for re-injection.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::network::core::packet_data::{CapturedPacket, PacketData};

/// Default priority for packet interception.
pub const DEFAULT_PRIORITY: i16 = 0;

/// Receive buffer size; large enough for any IP packet.
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Packets the driver may queue while the pipeline is busy sleeping.
pub const DEFAULT_QUEUE_LENGTH: u64 = 8192;

/// How long (ms) a queued packet may wait before the driver discards it.
pub const DEFAULT_QUEUE_TIME_MS: u64 = 2000;

/// Errors reported by capture backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The driver refused the filter expression itself
    #[error("filter rejected: {0}")]
    FilterRejected(String),

    /// Opening the handle failed for any other reason
    #[error("open failed: {0}")]
    Open(String),

    /// No capture driver is available on this platform
    #[error("{0}")]
    Unsupported(String),

    /// Receiving the next packet failed
    #[error("receive failed: {0}")]
    Recv(String),

    /// Re-injecting a packet failed
    #[error("send failed: {0}")]
    Send(String),

    /// Releasing the handle failed
    #[error("close failed: {0}")]
    Close(String),
}

impl CaptureError {
    /// Whether the failure was caused by the filter expression.
    pub fn is_filter_rejection(&self) -> bool {
        matches!(self, CaptureError::FilterRejected(_))
    }
}

/// Configuration for opening a capture handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleConfig {
    /// Filter expression for packet matching
    pub filter: String,
    /// Priority for the handle (higher = earlier interception)
    pub priority: i16,
    /// Maximum packets queued in the driver
    pub queue_length: u64,
    /// Maximum time (ms) a packet may sit in the driver queue
    pub queue_time_ms: u64,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            filter: "tcp or udp".to_string(),
            priority: DEFAULT_PRIORITY,
            queue_length: DEFAULT_QUEUE_LENGTH,
            queue_time_ms: DEFAULT_QUEUE_TIME_MS,
        }
    }
}

impl HandleConfig {
    /// Creates a new HandleConfig with the given filter.
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Default::default()
        }
    }

    /// Sets the priority for the handle.
    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the driver queue limits.
    pub fn queue(mut self, length: u64, time_ms: u64) -> Self {
        self.queue_length = length;
        self.queue_time_ms = time_ms;
        self
    }
}

/// Wakes a receive blocked on a [`CaptureHandle`] from any thread.
///
/// Once fired, the handle's pending and later `recv` calls return
/// `Ok(None)`. Firing more than once is harmless.
#[derive(Clone)]
pub struct RecvInterrupt(Arc<dyn Fn() + Send + Sync>);

impl RecvInterrupt {
    pub fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(wake))
    }

    pub fn fire(&self) {
        (self.0)()
    }
}

impl fmt::Debug for RecvInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecvInterrupt")
    }
}

/// Opens capture handles for a filter expression.
pub trait CaptureBackend {
    type Handle: CaptureHandle;

    /// Opens a handle that intercepts every packet matching `config.filter`.
    fn open(&self, config: &HandleConfig) -> Result<Self::Handle, CaptureError>;
}

/// An open capture: a lazy, unbounded stream of intercepted packets plus a
/// way to put packets back on the wire.
///
/// Packets that are received but never sent are effectively dropped.
pub trait CaptureHandle {
    type Packet: CapturedPacket;

    /// Blocks until the next packet arrives.
    ///
    /// Returns `Ok(None)` once the handle is closed or the stream has ended.
    fn recv(&mut self) -> Result<Option<Self::Packet>, CaptureError>;

    /// Re-injects a packet. Packets go out in the order they are sent.
    fn send(&mut self, packet: &Self::Packet) -> Result<(), CaptureError>;

    /// Releases driver resources. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), CaptureError>;

    /// Returns a callback that shuts down the receive side of this handle,
    /// so a thread blocked in `recv` gets `Ok(None)` without waiting for
    /// the next packet. Sending is unaffected.
    fn recv_interrupt(&self) -> RecvInterrupt;

    /// Iterates received packets until the stream ends or errors.
    fn packets(&mut self) -> Packets<'_, Self>
    where
        Self: Sized,
    {
        Packets { handle: self }
    }
}

/// Iterator over the packets of a [`CaptureHandle`].
///
/// Not restartable: once the handle reports the end of the stream it keeps
/// returning `None`.
pub struct Packets<'h, H: CaptureHandle> {
    handle: &'h mut H,
}

impl<H: CaptureHandle> Iterator for Packets<'_, H> {
    type Item = Result<PacketData<H::Packet>, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.handle.recv() {
            Ok(Some(packet)) => Some(Ok(PacketData::from(packet))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::core::mock::MockBackend;

    #[test]
    fn test_handle_config_default() {
        let config = HandleConfig::default();
        assert_eq!(config.filter, "tcp or udp");
        assert_eq!(config.priority, DEFAULT_PRIORITY);
        assert_eq!(config.queue_length, DEFAULT_QUEUE_LENGTH);
    }

    #[test]
    fn test_handle_config_builder() {
        let config = HandleConfig::with_filter("tcp")
            .priority(100)
            .queue(1024, 500);

        assert_eq!(config.filter, "tcp");
        assert_eq!(config.priority, 100);
        assert_eq!(config.queue_length, 1024);
        assert_eq!(config.queue_time_ms, 500);
    }

    #[test]
    fn test_packets_iterator_ends_with_stream() {
        let backend = MockBackend::with_packets(vec![vec![1u8; 10], vec![2u8; 20]]);
        let mut handle = backend.open(&HandleConfig::default()).unwrap();

        let sizes: Vec<usize> = handle
            .packets()
            .map(|p| p.unwrap().size())
            .collect();

        assert_eq!(sizes, vec![10, 20]);
        assert!(handle.packets().next().is_none());
    }

    #[test]
    fn test_recv_interrupt_ends_blocked_receive() {
        let backend = MockBackend::blocking(vec![vec![1u8; 10]]);
        let mut handle = backend.open(&HandleConfig::default()).unwrap();
        let interrupt = handle.recv_interrupt();

        assert_eq!(handle.recv().unwrap().map(|p| p.len()), Some(10));

        let waker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            interrupt.fire();
        });
        assert!(handle.recv().unwrap().is_none());
        waker.join().unwrap();

        assert!(handle.recv().unwrap().is_none());
    }

    #[test]
    fn test_filter_rejection_detection() {
        assert!(CaptureError::FilterRejected("x".into()).is_filter_rejection());
        assert!(!CaptureError::Open("x".into()).is_filter_rejection());
    }
}
