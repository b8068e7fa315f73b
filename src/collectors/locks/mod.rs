use crate::collectors::{
    Collector, CollectorError, MetricDesc, MetricSink, ScrapeContext, Server,
    util::{as_value, begin, query_span},
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{Span, debug, instrument};
use tracing_futures::Instrument as _;

const QUERY: &str = "SELECT d.datname::text, l.mode, count(*) \
     FROM pg_locks l \
     JOIN pg_database d ON d.oid = l.database \
     GROUP BY d.datname, l.mode";

/// Held locks per database and lock mode (opt-in; `pg_locks` can be large on
/// busy servers).
pub struct LocksCollector {
    count: Arc<MetricDesc>,
}

impl LocksCollector {
    pub const ENABLED_BY_DEFAULT: bool = false;

    /// # Errors
    ///
    /// Returns an error if the metric descriptor is invalid.
    pub fn new(span: &Span) -> Result<Self> {
        let count = MetricDesc::gauge(
            "locks",
            "count",
            "Number of locks held per database and mode",
            &["datname", "mode"],
        )?;
        span.in_scope(|| debug!("locks collector ready"));
        Ok(Self { count })
    }
}

impl Collector for LocksCollector {
    #[instrument(
        skip_all,
        level = "info",
        fields(collector = "locks", server = %server.label(), otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        server: &'a Server,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let mut tx = begin(ctx, server).await?;

            let rows = sqlx::query_as::<_, (String, String, i64)>(QUERY)
                .fetch_all(&mut *tx)
                .instrument(query_span("SELECT", QUERY))
                .await?;

            for (datname, mode, count) in &rows {
                sink.record(&self.count, as_value(*count), &[datname.as_str(), mode.as_str()]);
            }

            Ok(())
        })
    }
}
