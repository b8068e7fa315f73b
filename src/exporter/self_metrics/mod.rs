//! Metrics about the exporter itself, kept in a long-lived registry and
//! merged into every `/metrics` response next to the scraped samples.

mod process;
mod scraper;

pub use process::ProcessMetrics;
pub use scraper::{ScrapeTimer, ScraperMetrics};

use crate::built_info;
use prometheus::{IntGaugeVec, Opts, Registry, proto::MetricFamily};
use tracing::debug;

pub struct ExporterMetrics {
    registry: Registry,
    scraper: ScraperMetrics,
    process: ProcessMetrics,
}

impl ExporterMetrics {
    /// # Errors
    ///
    /// Returns an error if a metric cannot be created or registered.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let build_info = IntGaugeVec::new(
            Opts::new("pg_exporter_build_info", "pg_exporter build information"),
            &["version", "commit"],
        )?;
        build_info
            .with_label_values(&[
                built_info::PKG_VERSION,
                built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown"),
            ])
            .set(1);
        registry.register(Box::new(build_info))?;

        let scraper = ScraperMetrics::new()?;
        scraper.register(&registry)?;

        let process = ProcessMetrics::new()?;
        process.register(&registry)?;

        debug!("registered exporter metrics");

        Ok(Self {
            registry,
            scraper,
            process,
        })
    }

    #[must_use]
    pub fn start_scrape(&self) -> ScrapeTimer {
        self.scraper.start_scrape()
    }

    /// Refresh process usage and gather every exporter family.
    #[must_use]
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.process.refresh();
        self.registry.gather()
    }
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics").finish_non_exhaustive()
    }
}
