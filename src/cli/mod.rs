pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

use crate::cli::actions::Action;
use anyhow::Result;

/// Parse the command line, install telemetry and return the action to run.
///
/// # Errors
///
/// Returns an error if telemetry cannot be initialized or the arguments are
/// invalid
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    telemetry::init(matches.get_count("verbose"))?;

    dispatch::handler(&matches)
}
