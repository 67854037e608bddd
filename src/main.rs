#![warn(clippy::all)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};

use netthrottle::commands::{self, InitConfigArgs, ListArgs, RunArgs};
use netthrottle::logging::{init_logger, parse_level};
use netthrottle::settings::Settings;
use netthrottle::Result;

#[derive(Debug, Parser)]
#[command(name = "netthrottle", version, about = "Throttle the network traffic of one process")]
struct Cli {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(long = "config", short = 'c', id = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Shape the target's traffic until the exit key is pressed (default)
    Run(RunArgs),
    /// Show the processes a name matches, their ports and capture filter
    List(ListArgs),
    /// Write a commented configuration template
    InitConfig(InitConfigArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(()) => {
            info!("Application shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if log::max_level() == LevelFilter::Off {
                eprintln!("Error: {}", e);
            } else {
                error!("Fatal error: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();

    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::InitConfig(args) => {
            init_logger(LevelFilter::Info, None)?;
            let path = commands::config::init_config_path(config)?;
            commands::init_config(&path, args.force)
        }
        Command::Run(args) => {
            let (loaded, source) = commands::load_settings(config)?;
            // Validation can fail on the level itself; log at INFO until then.
            let settings = match args.apply(loaded.builder()).build() {
                Ok(settings) => settings,
                Err(e) => {
                    init_logger(LevelFilter::Info, None)?;
                    source.log();
                    return Err(e);
                }
            };
            start_logging(&settings)?;
            source.log();
            commands::run::execute(&settings)
        }
        Command::List(args) => {
            let (loaded, source) = commands::load_settings(config)?;
            start_logging(&loaded)?;
            source.log();
            commands::list::execute(&args, &loaded)
        }
    }
}

fn start_logging(settings: &Settings) -> Result<()> {
    let level = parse_level(&settings.logging.log_level).unwrap_or(LevelFilter::Info);
    init_logger(level, settings.logging.log_file.as_deref())
}
