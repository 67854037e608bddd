use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT_RANGE_START: u16 = 49000;
pub const DEFAULT_PORT_RANGE_END: u16 = 65000;

/// Which process to shape, and the destination ports to capture when its
/// own ports cannot be listed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TargetOptions {
    /// Case-insensitive substring of the target's process name
    #[serde(default)]
    pub process_name_substring: String,

    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
}

fn default_port_range_start() -> u16 {
    DEFAULT_PORT_RANGE_START
}

fn default_port_range_end() -> u16 {
    DEFAULT_PORT_RANGE_END
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            process_name_substring: String::new(),
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
        }
    }
}
