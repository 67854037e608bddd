//! Packet interception and shaping.
//!
//! `core` wraps the capture driver, `modules` holds the rate governors and
//! the per-packet effects, `processing` runs the capture loop and `utils`
//! builds the capture filter.

pub mod core;
pub mod modules;
pub mod processing;
pub mod stats;
pub mod types;
pub mod utils;
