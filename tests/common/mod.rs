#![allow(dead_code)]

use futures::future::BoxFuture;
use pg_exporter::collectors::{
    Collector, CollectorError, CollectorRegistry, MetricDesc, MetricSink, Sample, ScrapeContext,
    Server,
};
use secrecy::SecretString;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// A descriptor for a server nothing listens on. Handles are lazy, so fake
/// collectors can run against it without a database.
pub fn unreachable_target(name: &str) -> SecretString {
    SecretString::from(format!("postgresql://exporter:pw@{name}:1/postgres"))
}

/// Get an available port for testing
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to ephemeral port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Build test URL for HTTP requests
pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Wait for server to be ready
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{port}"))
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

/// Behaviours the fake collectors can take on.
pub enum Fake {
    /// Emits `pg_fake_uptime_seconds` and succeeds.
    Uptime,
    /// Reports no data, like replication metrics on a primary.
    NoData,
    /// Always fails hard.
    Failing,
    /// Sleeps, then succeeds.
    Slow(Duration),
}

impl Collector for Fake {
    fn update<'a>(
        &'a self,
        _ctx: &'a ScrapeContext,
        _server: &'a Server,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            match self {
                Self::Uptime => {
                    let desc = MetricDesc::gauge("fake", "uptime_seconds", "Fake uptime", &[])?;
                    sink.record(&desc, 1234.0, &[]);
                    Ok(())
                }
                Self::NoData => Err(CollectorError::NoData),
                Self::Failing => Err(anyhow::anyhow!("connection refused").into()),
                Self::Slow(delay) => {
                    sleep(*delay).await;
                    Ok(())
                }
            }
        })
    }
}

/// Registry holding one fake per `(name, enabled, behaviour)`.
pub fn fake_registry(fakes: Vec<(&str, bool, Fake)>) -> CollectorRegistry {
    let mut registry = CollectorRegistry::new();
    for (name, enabled, fake) in fakes {
        let fake = Arc::new(fake);
        registry
            .register(name, enabled, move |_span: &tracing::Span| {
                Ok(Arc::clone(&fake) as Arc<dyn Collector>)
            })
            .expect("fake names are unique");
    }
    registry
}

/// Meta samples named `metric` (`duration_seconds` or `success`) for `collector`.
pub fn meta_samples<'a>(samples: &'a [Sample], metric: &str, collector: &str) -> Vec<&'a Sample> {
    let fq_name = format!("pg_scrape_collector_{metric}");
    samples
        .iter()
        .filter(|s| s.desc().fq_name() == fq_name)
        .filter(|s| s.label("collector") == Some(collector))
        .collect()
}
