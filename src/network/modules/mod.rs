pub mod adaptive;
pub mod bandwidth;
pub mod delay;
pub mod drop;
pub mod traits;

// Re-export the governors for convenience
pub use adaptive::{AdaptationPolicy, AdaptiveRateLimiter};
pub use bandwidth::{LimiterSnapshot, RateLimiter, DEFAULT_WINDOW};
pub use delay::LagDelay;
pub use drop::DropPolicy;
pub use traits::RateGovernor;
