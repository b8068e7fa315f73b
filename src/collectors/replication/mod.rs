use crate::collectors::{
    Collector, CollectorError, MetricDesc, MetricSink, ScrapeContext, Server,
    util::{begin, query_span},
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{Span, debug, instrument};
use tracing_futures::Instrument as _;

const RECOVERY_QUERY: &str = "SELECT pg_is_in_recovery()";

const LAG_QUERY: &str = "SELECT \
     CASE WHEN pg_last_wal_receive_lsn() = pg_last_wal_replay_lsn() THEN 0 \
     ELSE GREATEST(0, EXTRACT(EPOCH FROM now() - pg_last_xact_replay_timestamp())) \
     END::float8, \
     pg_is_wal_replay_paused()";

/// Replica lag and replay state. Primaries report no data.
pub struct ReplicationCollector {
    lag_seconds: Arc<MetricDesc>,
    replay_paused: Arc<MetricDesc>,
}

impl ReplicationCollector {
    pub const ENABLED_BY_DEFAULT: bool = true;

    /// # Errors
    ///
    /// Returns an error if a metric descriptor is invalid.
    pub fn new(span: &Span) -> Result<Self> {
        let collector = Self {
            lag_seconds: MetricDesc::gauge(
                "replication",
                "lag_seconds",
                "Replication lag behind primary in seconds",
                &[],
            )?,
            replay_paused: MetricDesc::gauge(
                "replication",
                "replay_paused",
                "Whether WAL replay is paused (1 = paused)",
                &[],
            )?,
        };
        span.in_scope(|| debug!("replication collector ready"));
        Ok(collector)
    }
}

impl Collector for ReplicationCollector {
    #[instrument(
        skip_all,
        level = "info",
        fields(collector = "replication", server = %server.label(), otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        server: &'a Server,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let mut tx = begin(ctx, server).await?;

            let in_recovery = sqlx::query_scalar::<_, bool>(RECOVERY_QUERY)
                .fetch_one(&mut *tx)
                .instrument(query_span("SELECT", RECOVERY_QUERY))
                .await?;

            if !in_recovery {
                return Err(CollectorError::NoData);
            }

            // Option: both functions return NULL until the replica has received WAL.
            let (lag, paused) = sqlx::query_as::<_, (Option<f64>, Option<bool>)>(LAG_QUERY)
                .fetch_one(&mut *tx)
                .instrument(query_span("SELECT", LAG_QUERY))
                .await?;

            sink.record(&self.lag_seconds, lag.unwrap_or_default(), &[]);
            sink.record(
                &self.replay_paused,
                if paused.unwrap_or_default() { 1.0 } else { 0.0 },
                &[],
            );

            Ok(())
        })
    }
}
