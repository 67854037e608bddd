//! Command-line subcommands.
//!
//! `run` shapes the target's traffic, `list` shows what a pattern matches
//! and `init-config` writes a configuration template.

pub mod config;
pub mod list;
pub mod run;

pub use config::{default_config_path, init_config, load_settings, ConfigSource, InitConfigArgs};
pub use list::ListArgs;
pub use run::RunArgs;
