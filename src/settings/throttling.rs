use crate::control::keyboard::Key;
use crate::error::{Result, ThrottlerError};
use crate::logging::parse_level;
use crate::settings::bandwidth::BandwidthOptions;
use crate::settings::controls::ControlOptions;
use crate::settings::delay::DelayOptions;
use crate::settings::drop::DropOptions;
use crate::settings::logging::LoggingOptions;
use crate::settings::target::TargetOptions;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Serialization format of a configuration file, picked by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// `.json` selects JSON; anything else is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Everything a throttling run is configured with.
///
/// The option groups are flattened, so files use the flat key names
/// (`target_bandwidth_mbps`, `lag_delay_ms`, ...).
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Settings {
    #[serde(flatten)]
    pub bandwidth: BandwidthOptions,

    #[serde(flatten)]
    pub delay: DelayOptions,

    #[serde(flatten)]
    pub drop: DropOptions,

    #[serde(flatten)]
    pub target: TargetOptions,

    #[serde(flatten)]
    pub controls: ControlOptions,

    #[serde(flatten)]
    pub logging: LoggingOptions,
}

impl Settings {
    /// Loads settings from a TOML or JSON file.
    ///
    /// The file is parsed but not validated; validation happens when the
    /// final settings are assembled by the builder.
    ///
    /// # Arguments
    ///
    /// * `path` - Settings file; a `.json` extension selects JSON
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - Parsed settings, missing keys at their defaults
    /// * `Err(ThrottlerError::Io)` - If the file cannot be read
    /// * `Err(ThrottlerError::ConfigInvalid)` - If it cannot be parsed
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let settings = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                ThrottlerError::ConfigInvalid(format!("{}: {}", path.display(), e))
            })?,
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                ThrottlerError::ConfigInvalid(format!("{}: {}", path.display(), e))
            })?,
        };

        info!("Configuration loaded from {}", path.display());
        Ok(settings)
    }

    /// Saves the settings, creating parent directories as needed.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ThrottlerError::ConfigInvalid(e.to_string()))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| ThrottlerError::ConfigInvalid(e.to_string()))?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(content.as_bytes())?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Writes a TOML template with every default value commented out.
    pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let mut defaults = Self::default();
        defaults.target.process_name_substring = "Your-process-here".to_string();

        let serialized = toml::to_string_pretty(&defaults)
            .map_err(|e| ThrottlerError::ConfigInvalid(e.to_string()))?;

        let mut template = String::from(
            "# netthrottle configuration\n# Uncomment and edit the values you want to change.\n\n",
        );
        for line in serialized.lines() {
            if line.trim().is_empty() || line.starts_with('[') {
                template.push_str(line);
            } else {
                template.push_str("# ");
                template.push_str(line);
            }
            template.push('\n');
        }
        template.push_str("# log_file = \"netthrottle.log\"\n");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, template)?;
        Ok(())
    }

    /// Checks every bound; the first violation is reported.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ThrottlerError::ConfigInvalid(msg));

        let mbps = self.bandwidth.target_bandwidth_mbps;
        if !mbps.is_finite() || mbps <= 0.0 {
            return invalid(format!("target bandwidth must be positive, got {}", mbps));
        }

        let factor = self.bandwidth.adaptation_factor;
        if !(factor > 0.0 && factor < 1.0) {
            return invalid(format!(
                "adaptation factor must be between 0 and 1, got {}",
                factor
            ));
        }

        if self.controls.status_update_interval == 0 {
            return invalid("status update interval must be positive".into());
        }

        if self.target.port_range_start >= self.target.port_range_end {
            return invalid(format!(
                "port range start ({}) must be less than end ({})",
                self.target.port_range_start, self.target.port_range_end
            ));
        }

        if self.target.process_name_substring.trim().is_empty() {
            return invalid(
                "process_name_substring is not set (config file or --process)".into(),
            );
        }

        let toggle = self.toggle_key()?;
        let exit = self.exit_key()?;
        if toggle == exit {
            return invalid(format!("toggle and exit keys are both '{}'", toggle));
        }

        parse_level(&self.logging.log_level)?;
        Ok(())
    }

    pub fn max_bytes_per_second(&self) -> f64 {
        self.bandwidth.max_bytes_per_second()
    }

    pub fn toggle_key(&self) -> Result<Key> {
        parse_key("toggle_key", &self.controls.toggle_key)
    }

    pub fn exit_key(&self) -> Result<Key> {
        parse_key("exit_key", &self.controls.exit_key)
    }
}

fn parse_key(field: &str, value: &str) -> Result<Key> {
    value
        .parse()
        .map_err(|e| ThrottlerError::ConfigInvalid(format!("{}: {}", field, e)))
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bandwidth={}Mbps{}, delay={}ms, drop_rate={}%, process='{}'",
            self.bandwidth.target_bandwidth_mbps,
            if self.bandwidth.adaptive { " (adaptive)" } else { "" },
            self.delay.lag_delay_ms,
            self.drop.packet_drop_rate.value() * 100.0,
            self.target.process_name_substring
        )
    }
}
