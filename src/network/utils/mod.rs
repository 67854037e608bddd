pub mod filter;

pub use filter::{open_with_escalation, CaptureFilter, FilterBuilder};
