//! Shared helpers for the built-in collectors.

use crate::collectors::{CollectorError, ScrapeContext, Server};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{Span, info_span};
use tracing_futures::Instrument as _;

const STATEMENT_TIMEOUT_QUERY: &str = "SELECT set_config('statement_timeout', $1, true)";

/// Span for one SQL statement, tagged with the OpenTelemetry db attributes.
#[must_use]
pub fn query_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement,
        otel.kind = "client"
    )
}

/// Open a read transaction whose statement timeout is bounded by what is left
/// of the scrape deadline, so the server gives up when the scrape does.
///
/// Without a deadline the server default applies. Dropping the transaction
/// rolls it back.
///
/// # Errors
///
/// Returns `CollectorError::Query` if no connection can be acquired or the
/// timeout cannot be set.
pub async fn begin(
    ctx: &ScrapeContext,
    server: &Server,
) -> Result<Transaction<'static, Postgres>, CollectorError> {
    let mut tx = server.pool().begin().await?;

    if let Some(remaining) = ctx.remaining() {
        sqlx::query(STATEMENT_TIMEOUT_QUERY)
            .bind(statement_timeout(remaining))
            .execute(&mut *tx)
            .instrument(query_span("SELECT", STATEMENT_TIMEOUT_QUERY))
            .await?;
    }

    Ok(tx)
}

/// `statement_timeout` setting for `remaining`. Never `0`, which would mean
/// no timeout at all.
#[must_use]
pub fn statement_timeout(remaining: Duration) -> String {
    format!("{}ms", remaining.as_millis().max(1))
}

/// Convert a counter/gauge read from PostgreSQL into a sample value.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn as_value(value: i64) -> f64 {
    value as f64
}
