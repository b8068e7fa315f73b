use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;

/// Counters for the scrape requests served by the exporter.
#[derive(Clone)]
pub struct ScraperMetrics {
    scrapes_total: IntCounter,
    scrape_errors_total: IntCounter,
    scrapes_in_flight: IntGauge,
    scrape_duration_seconds: Histogram,
}

impl ScraperMetrics {
    /// # Errors
    ///
    /// Returns an error if a metric cannot be created.
    pub fn new() -> prometheus::Result<Self> {
        let scrapes_total = IntCounter::with_opts(Opts::new(
            "pg_exporter_scrapes_total",
            "Total number of scrape requests served since start",
        ))?;
        let scrape_errors_total = IntCounter::with_opts(Opts::new(
            "pg_exporter_scrape_errors_total",
            "Scrape requests that were rejected or failed to produce metrics",
        ))?;
        let scrapes_in_flight = IntGauge::with_opts(Opts::new(
            "pg_exporter_scrapes_in_flight",
            "Scrape requests currently being served",
        ))?;
        let scrape_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pg_exporter_scrape_duration_seconds",
                "Time spent serving a scrape request in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        Ok(Self {
            scrapes_total,
            scrape_errors_total,
            scrapes_in_flight,
            scrape_duration_seconds,
        })
    }

    /// # Errors
    ///
    /// Returns an error if a metric is already registered.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.scrapes_total.clone()))?;
        registry.register(Box::new(self.scrape_errors_total.clone()))?;
        registry.register(Box::new(self.scrapes_in_flight.clone()))?;
        registry.register(Box::new(self.scrape_duration_seconds.clone()))?;
        Ok(())
    }

    /// Count a scrape as started; it stays in flight until the timer drops.
    #[must_use]
    pub fn start_scrape(&self) -> ScrapeTimer {
        self.scrapes_total.inc();
        self.scrapes_in_flight.inc();
        ScrapeTimer {
            start: Instant::now(),
            failed: false,
            scraper: self.clone(),
        }
    }
}

/// Tracks one scrape request. Dropping it records the duration.
pub struct ScrapeTimer {
    start: Instant,
    failed: bool,
    scraper: ScraperMetrics,
}

impl ScrapeTimer {
    pub fn fail(&mut self) {
        self.failed = true;
    }
}

impl Drop for ScrapeTimer {
    fn drop(&mut self) {
        self.scraper.scrapes_in_flight.dec();
        self.scraper
            .scrape_duration_seconds
            .observe(self.start.elapsed().as_secs_f64());
        if self.failed {
            self.scraper.scrape_errors_total.inc();
        }
    }
}
