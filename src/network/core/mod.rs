//! Core network functionality.
//!
//! This module contains the capture abstraction the pipeline is written
//! against, the packet wrapper, the clock, and the WinDivert backend.

pub mod clock;
pub mod handle;
#[cfg(test)]
pub mod mock;
pub mod packet_data;
pub mod timer;
#[cfg(windows)]
pub mod windivert;

// Re-export commonly used types
#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use handle::{
    CaptureBackend, CaptureError, CaptureHandle, HandleConfig, Packets, RecvInterrupt,
};
pub use packet_data::{CapturedPacket, PacketData};
pub use timer::{restore_timer_resolution, set_high_precision_timer};
#[cfg(windows)]
pub use windivert::{flush_wfp_cache, WinDivertBackend, WinDivertHandle};
