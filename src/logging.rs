//! Logger setup.
//!
//! Lines look like `[14:03:07.512] INFO - netthrottle::control::state: ...`.
//! `RUST_LOG`, when set, takes precedence over the configured level.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target};
use log::LevelFilter;

use crate::error::{Result, ThrottlerError};

/// Parses a level name. Accepts the usual `log` names plus `WARNING` and
/// `CRITICAL`, case-insensitively.
pub fn parse_level(name: &str) -> Result<LevelFilter> {
    let level = match name.trim().to_ascii_uppercase().as_str() {
        "OFF" => LevelFilter::Off,
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" | "CRITICAL" => LevelFilter::Error,
        _ => {
            return Err(ThrottlerError::ConfigInvalid(format!(
                "unknown log level '{}'",
                name
            )))
        }
    };
    Ok(level)
}

/// Installs the global logger. Fails if one is already installed.
///
/// # Arguments
///
/// * `level` - Default level; `RUST_LOG` takes precedence when set
/// * `log_file` - Optional file that receives a copy of every line
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level.as_str()));

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] {} - {}: {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(TeeWriter::new(io::stdout(), file))));
    }

    builder
        .try_init()
        .map_err(|e| ThrottlerError::InvalidArgument(format!("logger setup failed: {}", e)))
}

/// Writes everything to both the console and a log file.
struct TeeWriter<W: Write> {
    console: W,
    file: File,
}

impl<W: Write> TeeWriter<W> {
    fn new(console: W, file: File) -> Self {
        Self { console, file }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        self.file.flush()
    }
}
