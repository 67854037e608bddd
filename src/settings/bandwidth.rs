use serde::{Deserialize, Serialize};

pub const DEFAULT_BANDWIDTH_MBPS: f64 = 2.0;
pub const DEFAULT_ADAPTATION_FACTOR: f64 = 0.1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BandwidthOptions {
    /// Throughput cap for the target while throttling, in megabits per second
    #[serde(default = "default_bandwidth_mbps")]
    pub target_bandwidth_mbps: f64,

    /// Lower the cap while the window runs hot and recover it afterwards
    #[serde(default)]
    pub adaptive: bool,

    /// How strongly the adaptive limiter reacts, between 0 and 1
    #[serde(default = "default_adaptation_factor")]
    pub adaptation_factor: f64,
}

fn default_bandwidth_mbps() -> f64 {
    DEFAULT_BANDWIDTH_MBPS
}

fn default_adaptation_factor() -> f64 {
    DEFAULT_ADAPTATION_FACTOR
}

impl Default for BandwidthOptions {
    fn default() -> Self {
        Self {
            target_bandwidth_mbps: DEFAULT_BANDWIDTH_MBPS,
            adaptive: false,
            adaptation_factor: DEFAULT_ADAPTATION_FACTOR,
        }
    }
}

impl BandwidthOptions {
    /// The cap in bytes per second (`Mbps * 1_000_000 / 8`).
    pub fn max_bytes_per_second(&self) -> f64 {
        self.target_bandwidth_mbps * 1_000_000.0 / 8.0
    }
}
