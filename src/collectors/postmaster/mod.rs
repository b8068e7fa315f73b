use crate::collectors::{
    Collector, CollectorError, MetricDesc, MetricSink, ScrapeContext, Server,
    util::{begin, query_span},
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{Span, instrument};
use tracing_futures::Instrument as _;

const QUERY: &str = "SELECT EXTRACT(EPOCH FROM pg_postmaster_start_time())::float8";

/// Postmaster start time, the basis for uptime panels.
pub struct PostmasterCollector {
    start_time_seconds: Arc<MetricDesc>,
}

impl PostmasterCollector {
    pub const ENABLED_BY_DEFAULT: bool = true;

    /// # Errors
    ///
    /// Returns an error if the metric descriptor is invalid.
    pub fn new(_span: &Span) -> Result<Self> {
        Ok(Self {
            start_time_seconds: MetricDesc::gauge(
                "postmaster",
                "start_time_seconds",
                "Time at which postmaster started, in seconds since the unix epoch",
                &[],
            )?,
        })
    }
}

impl Collector for PostmasterCollector {
    #[instrument(
        skip_all,
        level = "info",
        fields(collector = "postmaster", server = %server.label(), otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        server: &'a Server,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let mut tx = begin(ctx, server).await?;

            let started = sqlx::query_scalar::<_, f64>(QUERY)
                .fetch_one(&mut *tx)
                .instrument(query_span("SELECT", QUERY))
                .await?;

            sink.record(&self.start_time_seconds, started, &[]);

            Ok(())
        })
    }
}
