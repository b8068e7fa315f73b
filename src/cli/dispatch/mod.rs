use crate::{
    cli::actions::Action,
    collectors::{COLLECTOR_NAMES, config::CollectorConfig},
};
use anyhow::{Result, anyhow};
use clap::{ArgMatches, parser::ValueSource};
use secrecy::SecretString;
use std::time::Duration;
use tracing::debug;

/// # Errors
///
/// Returns an error if required arguments are missing
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    // Get the port or return an error
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    // Get the listen address (None means auto-detect)
    let listen = matches.get_one::<String>("listen").cloned();

    let dsns: Vec<SecretString> = matches
        .get_many::<String>("dsn")
        .map(|vals| {
            vals.map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| SecretString::from(s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    if dsns.is_empty() {
        return Err(anyhow!(
            "At least one DSN is required. Please provide it using the --dsn flag."
        ));
    }

    let telemetry_path = matches
        .get_one::<String>("telemetry-path")
        .cloned()
        .ok_or_else(|| anyhow!("Telemetry path is required."))?;

    let scrape_timeout = matches
        .get_one::<u64>("scrape-timeout")
        .copied()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let collectors = get_collector_config(matches);
    debug!(overrides = ?collectors, targets = dsns.len(), "parsed command line");

    Ok(Action::Run {
        port,
        listen,
        dsns,
        collectors,
        telemetry_path,
        scrape_timeout,
    })
}

fn given_on_command_line(matches: &ArgMatches, flag: &str) -> bool {
    matches.value_source(flag) == Some(ValueSource::CommandLine) && matches.get_flag(flag)
}

/// Overrides for the collectors whose flags were explicitly passed. Flags
/// left alone keep the collector's default.
#[must_use]
pub fn get_collector_config(matches: &ArgMatches) -> CollectorConfig {
    COLLECTOR_NAMES
        .iter()
        .fold(CollectorConfig::new(), |config, &name| {
            if given_on_command_line(matches, &format!("no-collector.{name}")) {
                config.with_override(name, false)
            } else if given_on_command_line(matches, &format!("collector.{name}")) {
                config.with_override(name, true)
            } else {
                config
            }
        })
}
