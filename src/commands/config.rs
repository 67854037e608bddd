//! Locating, loading and initialising the configuration file.

use std::path::{Path, PathBuf};

use clap::Args;
use log::{debug, info, warn};

use crate::error::{Result, ThrottlerError};
use crate::settings::Settings;

pub const CONFIG_DIR_NAME: &str = "netthrottle";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// `<config_dir>/netthrottle/config.toml`, if the platform has a config
/// directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Where the loaded settings came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from this file
    File(PathBuf),
    /// An explicitly named file that does not exist
    Missing(PathBuf),
    /// No file given and none at the default location
    Defaults,
}

impl ConfigSource {
    /// Reports the source once logging is up.
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Using configuration from {}", path.display()),
            ConfigSource::Missing(path) => warn!(
                "Configuration file {} not found, using defaults",
                path.display()
            ),
            ConfigSource::Defaults => debug!("No configuration file, using defaults"),
        }
    }
}

/// Loads `explicit` if given, otherwise the file at the default location.
///
/// A missing file is not an error; a file that fails to parse is.
pub fn load_settings(explicit: Option<&Path>) -> Result<(Settings, ConfigSource)> {
    match explicit {
        Some(path) if path.exists() => {
            Ok((Settings::load_from_file(path)?, ConfigSource::File(path.to_path_buf())))
        }
        Some(path) => Ok((Settings::default(), ConfigSource::Missing(path.to_path_buf()))),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                let settings = Settings::load_from_file(&path)?;
                Ok((settings, ConfigSource::File(path)))
            }
            None => Ok((Settings::default(), ConfigSource::Defaults)),
        },
    }
}

/// Arguments of `init-config`.
#[derive(Debug, Default, Clone, Args)]
pub struct InitConfigArgs {
    /// Overwrite an existing file
    #[arg(long = "force", short = 'f', id = "force")]
    pub force: bool,
}

/// Writes the commented template to `path`.
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(ThrottlerError::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    Settings::create_default_config_file(path)?;
    info!("Wrote configuration template to {}", path.display());
    Ok(())
}

/// The path `init-config` writes to: `--config` or the default location.
pub fn init_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .ok_or_else(|| {
            ThrottlerError::InvalidArgument(
                "no configuration directory on this platform; pass --config".into(),
            )
        })
}
