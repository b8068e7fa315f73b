use std::time::Duration;
use thiserror::Error;

/// Outcome of a single `Collector::update` call that did not succeed.
///
/// `NoData` is the soft failure: the target legitimately has nothing to
/// report (e.g. replication metrics on a primary). Every other variant is a
/// hard failure. Both are reported as `success = 0`, only the log severity
/// differs.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector returned no data")]
    NoData,

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollectorError {
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// Errors raised while populating or configuring a `CollectorRegistry`.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate collector: {0}")]
    Duplicate(String),

    #[error("unknown collector: {0}")]
    Unknown(String),
}

/// Errors that abort building an `Orchestrator`. No partial orchestrator is
/// ever returned.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("missing collector: {0}")]
    Missing(String),

    #[error("disabled collector: {0}")]
    Disabled(String),

    #[error("failed to create collector {name}: {source}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid target {label}: {source}")]
    Connection {
        label: String,
        #[source]
        source: sqlx::Error,
    },

    /// Two different targets resolve to the same `server` label, so their
    /// series could not be told apart.
    #[error("duplicate target: {0}")]
    DuplicateTarget(String),
}
