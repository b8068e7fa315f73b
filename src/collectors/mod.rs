use futures::future::BoxFuture;
use std::sync::Arc;

#[macro_use]
mod register_macro;

pub mod config;
pub mod context;
pub mod error;
pub mod exposition;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod sink;
pub mod util;

pub use context::ScrapeContext;
pub use error::{CollectorError, OrchestratorError, RegistryError};
pub use orchestrator::Orchestrator;
pub use registry::CollectorRegistry;
pub use server::Server;
pub use sink::{MetricDesc, MetricKind, MetricSink, Sample};

/// Namespace for all metrics.
pub const NAMESPACE: &str = "pg";

/// A unit that queries one server and writes zero or more samples.
///
/// Instances are cached by name and shared by concurrent scrapes, so
/// `update` must not rely on exclusive access to `self`.
pub trait Collector: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollectorError::NoData` when the server has nothing to report
    /// and any other variant on failure.
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        server: &'a Server,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>>;
}

register_collectors! {
    database => DatabaseCollector,
    locks => LocksCollector,
    postmaster => PostmasterCollector,
    replication => ReplicationCollector,
    stat_database => StatDatabaseCollector,
}
