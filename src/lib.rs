//! # netthrottle - per-process network throttling
//!
//! netthrottle intercepts the traffic of one process with WinDivert and
//! re-injects it under a bandwidth cap, with an optional fixed delay and
//! random packet loss. Throttling is toggled at runtime with a hotkey.
//!
//! ## Architecture
//!
//! * `target`: process name to port set resolution
//! * `network::utils`: capture filter construction and escalation
//! * `network::processing`: the per-packet shaping pipeline
//! * `network::modules`: rate limiters, delay and drop policies
//! * `control`: the throttling toggle, hotkeys and shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netthrottle::prelude::*;
//!
//! let settings = SettingsBuilder::new()
//!     .process("RobloxPlayerBeta")
//!     .bandwidth_mbps(1.0)
//!     .lag_delay_ms(50)
//!     .build()?;
//! netthrottle::commands::run::execute(&settings)?;
//! ```

/// Command-line subcommands
pub mod commands;
/// Operator controls
pub mod control;
/// Centralized error handling
pub mod error;
/// Logger setup
pub mod logging;
/// Capture, shaping and statistics
pub mod network;
/// Prelude for convenient imports
pub mod prelude;
/// Configuration
pub mod settings;
/// Target process discovery
pub mod target;
/// Privilege and driver checks
pub mod utils;

// Re-export commonly used types
pub use error::{Result, ThrottlerError};
