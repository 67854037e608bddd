//! Fluent construction of [`Settings`].
//!
//! The builder is where file values and command-line overrides meet; the
//! result is validated before it is handed out.
//!
//! # Example
//!
//! ```rust
//! use netthrottle::settings::SettingsBuilder;
//!
//! let settings = SettingsBuilder::new()
//!     .process("RobloxPlayerBeta")
//!     .bandwidth_mbps(1.0)
//!     .drop_rate(0.05)
//!     .build()
//!     .unwrap();
//! assert_eq!(settings.max_bytes_per_second(), 125_000.0);
//! ```

use std::path::PathBuf;

use crate::error::{Result, ThrottlerError};
use crate::network::types::probability::Probability;
use crate::settings::throttling::Settings;

/// Builder for constructing validated `Settings`.
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
    drop_rate: Option<f64>,
}

impl SettingsBuilder {
    /// Creates a new builder seeded with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from already loaded settings, e.g. a config file.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            drop_rate: None,
        }
    }

    /// Target throughput in megabits per second.
    ///
    /// # Arguments
    ///
    /// * `mbps` - Bandwidth cap; converted with `mbps * 1_000_000 / 8`
    pub fn bandwidth_mbps(mut self, mbps: f64) -> Self {
        self.settings.bandwidth.target_bandwidth_mbps = mbps;
        self
    }

    /// Switches to the congestion-aware limiter.
    pub fn adaptive(mut self, adaptive: bool) -> Self {
        self.settings.bandwidth.adaptive = adaptive;
        self
    }

    pub fn adaptation_factor(mut self, factor: f64) -> Self {
        self.settings.bandwidth.adaptation_factor = factor;
        self
    }

    /// Fixed delay added to every shaped packet.
    pub fn lag_delay_ms(mut self, delay_ms: u64) -> Self {
        self.settings.delay.lag_delay_ms = delay_ms;
        self
    }

    /// Drop probability in `[0, 1]`. Checked by [`build`](Self::build).
    ///
    /// # Arguments
    ///
    /// * `rate` - Probability as a fraction (0.0 to 1.0)
    pub fn drop_rate(mut self, rate: f64) -> Self {
        self.drop_rate = Some(rate);
        self
    }

    pub fn process(mut self, name_substring: impl Into<String>) -> Self {
        self.settings.target.process_name_substring = name_substring.into();
        self
    }

    /// Fallback port range used when the target's ports are unknown.
    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.settings.target.port_range_start = start;
        self.settings.target.port_range_end = end;
        self
    }

    pub fn toggle_key(mut self, key: impl Into<String>) -> Self {
        self.settings.controls.toggle_key = key.into();
        self
    }

    pub fn exit_key(mut self, key: impl Into<String>) -> Self {
        self.settings.controls.exit_key = key.into();
        self
    }

    /// Log a status line every `packets` processed packets.
    pub fn status_update_interval(mut self, packets: u64) -> Self {
        self.settings.controls.status_update_interval = packets;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.settings.logging.log_level = level.into();
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.logging.log_file = Some(path.into());
        self
    }

    /// Validates and returns the configured `Settings`.
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - If every option is within bounds
    /// * `Err(ThrottlerError::ConfigInvalid)` - Naming the first bad option
    pub fn build(mut self) -> Result<Settings> {
        if let Some(rate) = self.drop_rate {
            self.settings.drop.packet_drop_rate = Probability::new(rate).map_err(|e| {
                ThrottlerError::ConfigInvalid(format!("packet_drop_rate: {}", e))
            })?;
        }

        self.settings.validate()?;
        Ok(self.settings)
    }
}

impl Settings {
    /// Creates a builder seeded with these settings.
    pub fn builder(self) -> SettingsBuilder {
        SettingsBuilder::from_settings(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_process() {
        let result = SettingsBuilder::new().build();
        assert!(matches!(result, Err(ThrottlerError::ConfigInvalid(_))));
    }

    #[test]
    fn test_builder_sets_every_group() {
        let settings = SettingsBuilder::new()
            .process("game")
            .bandwidth_mbps(8.0)
            .adaptive(true)
            .adaptation_factor(0.2)
            .lag_delay_ms(0)
            .drop_rate(0.25)
            .port_range(1000, 2000)
            .toggle_key("F2")
            .exit_key("q")
            .status_update_interval(10)
            .log_level("debug")
            .log_file("out.log")
            .build()
            .unwrap();

        assert_eq!(settings.max_bytes_per_second(), 1_000_000.0);
        assert!(settings.bandwidth.adaptive);
        assert_eq!(settings.bandwidth.adaptation_factor, 0.2);
        assert_eq!(settings.delay.lag_delay_ms, 0);
        assert_eq!(settings.drop.packet_drop_rate.value(), 0.25);
        assert_eq!(settings.target.port_range_start, 1000);
        assert_eq!(settings.target.port_range_end, 2000);
        assert_eq!(settings.controls.status_update_interval, 10);
        assert_eq!(settings.logging.log_file, Some(PathBuf::from("out.log")));
    }

    #[test]
    fn test_builder_rejects_out_of_range_drop_rate() {
        let result = SettingsBuilder::new().process("game").drop_rate(1.2).build();
        assert!(matches!(result, Err(ThrottlerError::ConfigInvalid(ref m)) if m.contains("packet_drop_rate")));
    }

    #[test]
    fn test_overrides_apply_on_top_of_loaded_settings() {
        let mut loaded = Settings::default();
        loaded.target.process_name_substring = "from-file".into();
        loaded.delay.lag_delay_ms = 40;

        let settings = loaded.builder().bandwidth_mbps(0.5).build().unwrap();

        assert_eq!(settings.target.process_name_substring, "from-file");
        assert_eq!(settings.delay.lag_delay_ms, 40);
        assert_eq!(settings.bandwidth.target_bandwidth_mbps, 0.5);
    }

    #[test]
    fn test_builder_rejects_inverted_port_range() {
        let result = SettingsBuilder::new()
            .process("game")
            .port_range(60000, 50000)
            .build();
        assert!(result.is_err());
    }
}
