use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_LOG_LEVEL: &str = "INFO";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    /// DEBUG, INFO, WARNING, ERROR or CRITICAL (case-insensitive)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Also append log output to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}
