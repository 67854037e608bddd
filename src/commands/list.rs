//! The `list` command: show which processes a pattern matches, their ports
//! and the capture filter a run would start with.

use clap::Args;
use log::warn;
use serde::Serialize;

use crate::error::{Result, ThrottlerError};
use crate::network::utils::FilterBuilder;
use crate::settings::Settings;
use crate::target::{ProcessSource, SystemProcessSource, TargetResolver};

#[derive(Debug, Default, Clone, Args)]
pub struct ListArgs {
    /// Name substring to match; defaults to the configured process
    #[arg(long = "process", short = 'p', id = "process")]
    pub process: Option<String>,

    /// Print JSON instead of a table
    #[arg(long = "json", id = "json")]
    pub json: bool,
}

/// One matching process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedProcess {
    pub pid: u32,
    pub name: String,
    pub ports: Vec<u16>,
    /// Capture filter a run against this process would try first
    pub filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_error: Option<String>,
}

pub fn execute(args: &ListArgs, settings: &Settings) -> Result<()> {
    let pattern = args
        .process
        .clone()
        .unwrap_or_else(|| settings.target.process_name_substring.clone());
    let resolver = TargetResolver::new(SystemProcessSource::new());
    let builder = FilterBuilder::new(
        settings.target.port_range_start,
        settings.target.port_range_end,
    );

    let listing = collect(&resolver, &builder, &pattern)?;
    if listing.is_empty() {
        return Err(ThrottlerError::TargetNotFound(pattern));
    }

    if args.json {
        let json = serde_json::to_string_pretty(&listing)
            .map_err(|e| ThrottlerError::InvalidArgument(e.to_string()))?;
        println!("{}", json);
    } else {
        print!("{}", render_table(&listing));
    }
    Ok(())
}

/// Every process matching `pattern`, first match first.
pub fn collect<S: ProcessSource>(
    resolver: &TargetResolver<S>,
    builder: &FilterBuilder,
    pattern: &str,
) -> Result<Vec<ListedProcess>> {
    let matches = resolver.find_all(pattern)?;

    Ok(matches
        .into_iter()
        .map(|process| {
            let (ports, port_error) = match resolver.discover_ports(process.pid) {
                Ok(ports) => (ports, None),
                Err(e) => {
                    warn!("{}", e);
                    (Default::default(), Some(e.to_string()))
                }
            };
            ListedProcess {
                pid: process.pid,
                name: process.name,
                filter: builder.build(&ports).to_string(),
                ports: ports.into_iter().collect(),
                port_error,
            }
        })
        .collect())
}

fn render_table(listing: &[ListedProcess]) -> String {
    let mut out = String::new();
    for (index, process) in listing.iter().enumerate() {
        let marker = if index == 0 { "*" } else { " " };
        out.push_str(&format!("{} {:>7}  {}\n", marker, process.pid, process.name));

        match &process.port_error {
            Some(e) => out.push_str(&format!("           ports: unavailable ({})\n", e)),
            None => out.push_str(&format!("           ports: {:?}\n", process.ports)),
        }
        out.push_str(&format!("           filter: {}\n", process.filter));
    }
    out
}
