use serde::{Deserialize, Serialize};

pub const DEFAULT_TOGGLE_KEY: &str = "f1";
pub const DEFAULT_EXIT_KEY: &str = "esc";
pub const DEFAULT_STATUS_UPDATE_INTERVAL: u64 = 100;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ControlOptions {
    /// Hotkey that switches throttling on and off
    #[serde(default = "default_toggle_key")]
    pub toggle_key: String,

    /// Hotkey that stops the run
    #[serde(default = "default_exit_key")]
    pub exit_key: String,

    /// Log a status line every this many packets
    #[serde(default = "default_status_update_interval")]
    pub status_update_interval: u64,
}

fn default_toggle_key() -> String {
    DEFAULT_TOGGLE_KEY.to_string()
}

fn default_exit_key() -> String {
    DEFAULT_EXIT_KEY.to_string()
}

fn default_status_update_interval() -> u64 {
    DEFAULT_STATUS_UPDATE_INTERVAL
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            toggle_key: default_toggle_key(),
            exit_key: default_exit_key(),
            status_update_interval: DEFAULT_STATUS_UPDATE_INTERVAL,
        }
    }
}
