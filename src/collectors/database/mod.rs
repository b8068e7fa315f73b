use crate::collectors::{
    Collector, CollectorError, MetricDesc, MetricSink, ScrapeContext, Server,
    util::{as_value, begin, query_span},
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{Span, debug, instrument};
use tracing_futures::Instrument as _;

const QUERY: &str = "SELECT datname::text, pg_database_size(datname), datconnlimit \
     FROM pg_database \
     WHERE datallowconn AND has_database_privilege(datname, 'CONNECT')";

/// Size and connection limit of every database the exporter may connect to.
pub struct DatabaseCollector {
    size_bytes: Arc<MetricDesc>,
    connection_limit: Arc<MetricDesc>,
}

impl DatabaseCollector {
    pub const ENABLED_BY_DEFAULT: bool = true;

    /// # Errors
    ///
    /// Returns an error if a metric descriptor is invalid.
    pub fn new(span: &Span) -> Result<Self> {
        let collector = Self {
            size_bytes: MetricDesc::gauge(
                "database",
                "size_bytes",
                "Disk space used by the database",
                &["datname"],
            )?,
            connection_limit: MetricDesc::gauge(
                "database",
                "connection_limit",
                "Connection limit set for the database (-1 = unlimited)",
                &["datname"],
            )?,
        };
        span.in_scope(|| debug!("database collector ready"));
        Ok(collector)
    }
}

impl Collector for DatabaseCollector {
    #[instrument(
        skip_all,
        level = "info",
        fields(collector = "database", server = %server.label(), otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        server: &'a Server,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let mut tx = begin(ctx, server).await?;

            let rows = sqlx::query_as::<_, (String, i64, i32)>(QUERY)
                .fetch_all(&mut *tx)
                .instrument(query_span("SELECT", QUERY))
                .await?;

            for (datname, size, limit) in &rows {
                sink.record(&self.size_bytes, as_value(*size), &[datname.as_str()]);
                sink.record(&self.connection_limit, f64::from(*limit), &[datname.as_str()]);
            }

            Ok(())
        })
    }
}
