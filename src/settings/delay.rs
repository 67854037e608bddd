use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_LAG_DELAY_MS: u64 = 10;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DelayOptions {
    /// Fixed delay added to every throttled packet, in milliseconds
    #[serde(default = "default_lag_delay_ms")]
    pub lag_delay_ms: u64,
}

fn default_lag_delay_ms() -> u64 {
    DEFAULT_LAG_DELAY_MS
}

impl Default for DelayOptions {
    fn default() -> Self {
        Self {
            lag_delay_ms: DEFAULT_LAG_DELAY_MS,
        }
    }
}

impl DelayOptions {
    pub fn lag_delay(&self) -> Duration {
        Duration::from_millis(self.lag_delay_ms)
    }
}
