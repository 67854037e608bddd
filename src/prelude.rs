//! Prelude module for convenient imports.
//!
//! ```rust
//! use netthrottle::prelude::*;
//! ```

// Error handling
pub use crate::error::{Result, ThrottlerError};

// Capture
pub use crate::network::core::{
    CaptureBackend, CaptureError, CaptureHandle, Clock, HandleConfig, PacketData, RecvInterrupt,
    SystemClock,
};

// Shaping
pub use crate::network::modules::{
    AdaptiveRateLimiter, DropPolicy, LagDelay, LimiterSnapshot, RateGovernor, RateLimiter,
};
pub use crate::network::processing::{PacketOutcome, ShapingPipeline};
pub use crate::network::stats::{StatsCollector, StatsReport};
pub use crate::network::types::probability::Probability;
pub use crate::network::utils::{open_with_escalation, CaptureFilter, FilterBuilder};

// Target discovery
pub use crate::target::{ProcessSource, SystemProcessSource, TargetDescriptor, TargetResolver};

// Control
pub use crate::control::{ControlPlane, ControlState, Key, KeyListener, KeySource};

// Settings
pub use crate::settings::{Settings, SettingsBuilder};
