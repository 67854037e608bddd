pub mod processor;

pub use processor::{PacketOutcome, ShapingPipeline};
