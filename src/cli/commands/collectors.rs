use crate::collectors::{COLLECTOR_NAMES, CollectorRegistry};
use clap::{Arg, ArgAction, Command};

/// Add a `--collector.<name>` / `--no-collector.<name>` pair for every
/// built-in collector. Whichever flag comes last wins.
pub fn add_collectors_args(mut cmd: Command) -> Command {
    let registry = CollectorRegistry::with_builtin().unwrap_or_default();

    for &name in COLLECTOR_NAMES {
        let default_enabled = registry.default_enabled(name).unwrap_or(false);

        let enable_flag: &'static str = Box::leak(format!("collector.{name}").into_boxed_str());
        let disable_flag: &'static str = Box::leak(format!("no-collector.{name}").into_boxed_str());

        let default_indicator = if default_enabled {
            " [default: enabled]"
        } else {
            " [default: disabled]"
        };
        let enable_help: &'static str =
            Box::leak(format!("Enable the {name} collector{default_indicator}").into_boxed_str());
        let disable_help: &'static str =
            Box::leak(format!("Disable the {name} collector").into_boxed_str());

        cmd = cmd
            .arg(
                Arg::new(enable_flag)
                    .long(enable_flag)
                    .help(enable_help)
                    .help_heading("Collectors")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new(disable_flag)
                    .long(disable_flag)
                    .help(disable_help)
                    .help_heading("Collectors")
                    .action(ArgAction::SetTrue)
                    .overrides_with(enable_flag),
            );
    }
    cmd
}
