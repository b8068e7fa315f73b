use crate::collectors::{
    Collector, CollectorError, MetricDesc, MetricSink, ScrapeContext, Server,
    util::{as_value, begin, query_span},
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{Span, debug, instrument};
use tracing_futures::Instrument as _;

const QUERY: &str = "SELECT datname::text, numbackends, xact_commit, xact_rollback, \
     blks_read, blks_hit, deadlocks \
     FROM pg_stat_database \
     WHERE datname IS NOT NULL";

type StatRow = (String, i32, i64, i64, i64, i64, i64);

/// Per-database activity from `pg_stat_database`.
pub struct StatDatabaseCollector {
    numbackends: Arc<MetricDesc>,
    xact_commit: Arc<MetricDesc>,
    xact_rollback: Arc<MetricDesc>,
    blks_read: Arc<MetricDesc>,
    blks_hit: Arc<MetricDesc>,
    deadlocks: Arc<MetricDesc>,
}

impl StatDatabaseCollector {
    pub const ENABLED_BY_DEFAULT: bool = true;

    /// # Errors
    ///
    /// Returns an error if a metric descriptor is invalid.
    pub fn new(span: &Span) -> Result<Self> {
        let labels = &["datname"];
        let collector = Self {
            numbackends: MetricDesc::gauge(
                "stat_database",
                "numbackends",
                "Number of backends currently connected to this database",
                labels,
            )?,
            xact_commit: MetricDesc::counter(
                "stat_database",
                "xact_commit",
                "Number of transactions in this database that have been committed",
                labels,
            )?,
            xact_rollback: MetricDesc::counter(
                "stat_database",
                "xact_rollback",
                "Number of transactions in this database that have been rolled back",
                labels,
            )?,
            blks_read: MetricDesc::counter(
                "stat_database",
                "blks_read",
                "Number of disk blocks read in this database",
                labels,
            )?,
            blks_hit: MetricDesc::counter(
                "stat_database",
                "blks_hit",
                "Number of times disk blocks were found already in the buffer cache",
                labels,
            )?,
            deadlocks: MetricDesc::counter(
                "stat_database",
                "deadlocks",
                "Number of deadlocks detected in this database",
                labels,
            )?,
        };
        span.in_scope(|| debug!("stat_database collector ready"));
        Ok(collector)
    }
}

impl Collector for StatDatabaseCollector {
    #[instrument(
        skip_all,
        level = "info",
        fields(collector = "stat_database", server = %server.label(), otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        server: &'a Server,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let mut tx = begin(ctx, server).await?;

            let rows = sqlx::query_as::<_, StatRow>(QUERY)
                .fetch_all(&mut *tx)
                .instrument(query_span("SELECT", QUERY))
                .await?;

            if rows.is_empty() {
                return Err(CollectorError::NoData);
            }

            for (datname, backends, commits, rollbacks, reads, hits, deadlocks) in &rows {
                let labels = &[datname.as_str()];
                sink.record(&self.numbackends, f64::from(*backends), labels);
                sink.record(&self.xact_commit, as_value(*commits), labels);
                sink.record(&self.xact_rollback, as_value(*rollbacks), labels);
                sink.record(&self.blks_read, as_value(*reads), labels);
                sink.record(&self.blks_hit, as_value(*hits), labels);
                sink.record(&self.deadlocks, as_value(*deadlocks), labels);
            }

            Ok(())
        })
    }
}
