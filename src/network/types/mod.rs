//! Value types shared across the network modules.

pub mod probability;

pub use probability::{Probability, ProbabilityError};
