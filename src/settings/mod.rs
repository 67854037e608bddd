//! Configuration for a throttling run.
//!
//! Each option group lives in its own module and is flattened into
//! [`Settings`], so configuration files use flat key names.

pub mod bandwidth;
pub mod builder;
pub mod controls;
pub mod delay;
pub mod drop;
pub mod logging;
pub mod target;
pub mod throttling;

// Re-export commonly used types
pub use builder::SettingsBuilder;
pub use throttling::{ConfigFormat, Settings};
