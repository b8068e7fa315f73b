use crate::cli::actions::Action;
use crate::collectors::CollectorRegistry;
use crate::exporter::{self, ExporterOptions};
use anyhow::Result;
use tracing::info;

/// Handle the run action
///
/// # Errors
///
/// Returns an error if the registry cannot be configured or the exporter
/// fails to start
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run {
            port,
            listen,
            dsns,
            collectors,
            telemetry_path,
            scrape_timeout,
        } => {
            let mut registry = CollectorRegistry::with_builtin()?;
            registry.apply(&collectors)?;

            info!(
                enabled = ?registry.enabled_names(),
                forced = ?registry.forced(),
                "collectors configured"
            );

            let options = ExporterOptions {
                telemetry_path,
                scrape_timeout,
            };

            exporter::new(port, listen, dsns, registry, options).await?;
        }
    }

    Ok(())
}
