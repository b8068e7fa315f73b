use crate::collectors::{
    Collector, NAMESPACE,
    context::ScrapeContext,
    error::{CollectorError, OrchestratorError},
    registry::CollectorRegistry,
    server::{Server, target_label},
    sink::{MetricDesc, MetricKind, MetricSink, Sample, build_fq_name},
};
use futures::stream::{FuturesUnordered, StreamExt};
use once_cell::sync::OnceCell;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info_span, instrument};
use tracing_futures::Instrument as _;

struct MetaDescs {
    duration: Arc<MetricDesc>,
    success: Arc<MetricDesc>,
}

fn meta_descs() -> &'static MetaDescs {
    static DESCS: OnceCell<MetaDescs> = OnceCell::new();
    DESCS.get_or_init(|| {
        #[allow(clippy::expect_used)]
        MetaDescs {
            duration: Arc::new(
                MetricDesc::new(
                    &build_fq_name(NAMESPACE, "scrape", "collector_duration_seconds"),
                    "pg_exporter: Duration of a collector scrape.",
                    MetricKind::Gauge,
                    &["collector"],
                )
                .expect("valid pg_scrape_collector_duration_seconds desc"),
            ),
            success: Arc::new(
                MetricDesc::new(
                    &build_fq_name(NAMESPACE, "scrape", "collector_success"),
                    "pg_exporter: Whether a collector succeeded.",
                    MetricKind::Gauge,
                    &["collector"],
                )
                .expect("valid pg_scrape_collector_success desc"),
            ),
        }
    })
}

/// Fans collection out over every (server, collector) pair of one scrape.
///
/// Built per scrape from the shared registry, immutable afterwards. Owns its
/// server handles; `close()` (or dropping it) releases them.
pub struct Orchestrator {
    collectors: Arc<BTreeMap<String, Arc<dyn Collector>>>,
    servers: Vec<Arc<Server>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("collectors", &self.collectors.keys().collect::<Vec<_>>())
            .field("servers", &self.servers)
            .finish()
    }
}

impl Orchestrator {
    /// Build an orchestrator over `targets` running every enabled collector,
    /// restricted to `filters` when it is not empty.
    ///
    /// Identical targets collapse into one server handle.
    ///
    /// # Errors
    ///
    /// - `Missing` if a filter names an unknown collector
    /// - `Disabled` if a filter names a disabled collector
    /// - `Factory` if a collector cannot be instantiated
    /// - `Connection` if a target descriptor is malformed
    /// - `DuplicateTarget` if two different targets share a label
    pub fn new(
        registry: &CollectorRegistry,
        targets: &[SecretString],
        filters: &[String],
    ) -> Result<Self, OrchestratorError> {
        let mut wanted = HashSet::new();
        for filter in filters {
            match registry.lookup(filter) {
                None => return Err(OrchestratorError::Missing(filter.clone())),
                Some(false) => return Err(OrchestratorError::Disabled(filter.clone())),
                Some(true) => {
                    wanted.insert(filter.as_str());
                }
            }
        }

        let mut collectors = BTreeMap::new();
        for name in registry.enabled_names() {
            if !wanted.is_empty() && !wanted.contains(name) {
                continue;
            }
            collectors.insert(name.to_string(), registry.get_or_create(name)?);
        }

        let mut seen = HashSet::new();
        let mut labels = HashSet::new();
        let mut servers = Vec::with_capacity(targets.len());
        for target in targets {
            if !seen.insert(target.expose_secret()) {
                continue;
            }
            let label = target_label(target)?;
            if !labels.insert(label.clone()) {
                return Err(OrchestratorError::DuplicateTarget(label));
            }
            servers.push(Arc::new(Server::new(target)?));
        }

        Ok(Self {
            collectors: Arc::new(collectors),
            servers,
        })
    }

    /// The two meta-metric descriptors, independent of the active collectors.
    #[must_use]
    pub fn describe(&self) -> [Arc<MetricDesc>; 2] {
        let descs = meta_descs();
        [Arc::clone(&descs.duration), Arc::clone(&descs.success)]
    }

    #[must_use]
    pub fn collector_names(&self) -> Vec<&str> {
        self.collectors.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    /// Run every collector against every server concurrently, writing domain
    /// samples and meta-metrics into `sink`. Returns once all units are done.
    ///
    /// Each server gets its own task, so a collector that blocks its thread
    /// only holds up the units of that server. With more than one server
    /// every sample is tagged `server=<label>`.
    #[instrument(
        skip_all,
        level = "info",
        fields(
            servers = self.servers.len(),
            collectors = self.collectors.len(),
            otel.kind = "internal"
        )
    )]
    pub async fn collect(&self, ctx: &ScrapeContext, sink: &MetricSink) {
        let tag_server = self.servers.len() > 1;
        let mut tasks = JoinSet::new();

        for server in &self.servers {
            let sink = if tag_server {
                sink.with_label("server", server.label())
            } else {
                sink.clone()
            };
            let ctx = *ctx;
            let collectors = Arc::clone(&self.collectors);
            let server = Arc::clone(server);
            let span = info_span!(
                "orchestrator.sub_collect",
                server = %server.label(),
                otel.kind = "internal"
            );

            tasks.spawn(
                async move { sub_collect(&ctx, &collectors, &server, &sink).await }
                    .instrument(span),
            );
        }

        // dropping the set on cancellation aborts the remaining tasks
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "server collection task failed");
            }
        }
    }

    /// Collect into a fresh sink and return every sample produced.
    pub async fn scrape(&self, ctx: &ScrapeContext) -> Vec<Sample> {
        let (sink, mut receiver) = MetricSink::channel();
        self.collect(ctx, &sink).await;
        drop(sink);
        receiver.drain()
    }

    /// Release every server handle.
    pub async fn close(&self) {
        for server in &self.servers {
            server.close().await;
        }
    }
}

async fn sub_collect(
    ctx: &ScrapeContext,
    collectors: &BTreeMap<String, Arc<dyn Collector>>,
    server: &Server,
    sink: &MetricSink,
) {
    let mut tasks = FuturesUnordered::new();

    for (name, collector) in collectors {
        tasks.push(execute(ctx, name, collector.as_ref(), server, sink));
    }

    while tasks.next().await.is_some() {}
}

/// Run one (collector, server) unit: time it, classify the outcome and
/// always emit its duration and success samples. Never fails.
#[instrument(
    skip(ctx, collector, server, sink),
    level = "debug",
    fields(server = %server.label(), otel.kind = "internal")
)]
pub async fn execute(
    ctx: &ScrapeContext,
    name: &str,
    collector: &dyn Collector,
    server: &Server,
    sink: &MetricSink,
) {
    let begin = Instant::now();

    let result = match ctx.deadline() {
        Some(deadline) => {
            match tokio::time::timeout_at(deadline, collector.update(ctx, server, sink)).await {
                Ok(result) => result,
                Err(_) => Err(CollectorError::DeadlineExceeded(begin.elapsed())),
            }
        }
        None => collector.update(ctx, server, sink).await,
    };

    let duration = begin.elapsed().as_secs_f64();

    let success = match result {
        Ok(()) => {
            debug!(collector = name, duration_seconds = duration, "collector succeeded");
            1.0
        }
        Err(ref e) if e.is_no_data() => {
            debug!(
                collector = name,
                duration_seconds = duration,
                error = %e,
                "collector returned no data"
            );
            0.0
        }
        Err(ref e) => {
            error!(
                collector = name,
                duration_seconds = duration,
                error = %e,
                "collector failed"
            );
            0.0
        }
    };

    let descs = meta_descs();
    sink.record(&descs.duration, duration, &[name]);
    sink.record(&descs.success, success, &[name]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::config::CollectorConfig;
    use futures::future::BoxFuture;
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    enum Stub {
        Ok,
        NoData,
    }

    impl Collector for Stub {
        fn update<'a>(
            &'a self,
            _ctx: &'a ScrapeContext,
            _server: &'a Server,
            _sink: &'a MetricSink,
        ) -> BoxFuture<'a, Result<(), CollectorError>> {
            Box::pin(async move {
                match self {
                    Self::Ok => Ok(()),
                    Self::NoData => Err(CollectorError::NoData),
                }
            })
        }
    }

    struct Hang;

    impl Collector for Hang {
        fn update<'a>(
            &'a self,
            _ctx: &'a ScrapeContext,
            _server: &'a Server,
            _sink: &'a MetricSink,
        ) -> BoxFuture<'a, Result<(), CollectorError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        }
    }

    /// Blocks its thread until it has been entered once per server.
    struct Rendezvous {
        arrived: Mutex<usize>,
        all_here: Condvar,
        expected: usize,
    }

    impl Collector for Rendezvous {
        fn update<'a>(
            &'a self,
            _ctx: &'a ScrapeContext,
            _server: &'a Server,
            _sink: &'a MetricSink,
        ) -> BoxFuture<'a, Result<(), CollectorError>> {
            Box::pin(async move {
                let mut arrived = self
                    .arrived
                    .lock()
                    .map_err(|_| anyhow::anyhow!("rendezvous lock poisoned"))?;
                *arrived += 1;
                self.all_here.notify_all();

                let (arrived, wait) = self
                    .all_here
                    .wait_timeout_while(arrived, Duration::from_secs(2), |n| *n < self.expected)
                    .map_err(|_| anyhow::anyhow!("rendezvous lock poisoned"))?;
                drop(arrived);

                if wait.timed_out() {
                    return Err(anyhow::anyhow!("servers were collected one after another").into());
                }
                Ok(())
            })
        }
    }

    fn target(db: &str) -> SecretString {
        SecretString::from(format!("postgres://exporter:pw@127.0.0.1:1/{db}"))
    }

    #[allow(clippy::unwrap_used)]
    fn registry() -> CollectorRegistry {
        let mut registry = CollectorRegistry::new();
        registry
            .register("ok", true, |_span: &tracing::Span| {
                Ok(Arc::new(Stub::Ok) as Arc<dyn Collector>)
            })
            .unwrap();
        registry
            .register("nodata", true, |_span: &tracing::Span| {
                Ok(Arc::new(Stub::NoData) as Arc<dyn Collector>)
            })
            .unwrap();
        registry
            .register("off", false, |_span: &tracing::Span| {
                Ok(Arc::new(Stub::Ok) as Arc<dyn Collector>)
            })
            .unwrap();
        registry
    }

    fn success_of<'a>(samples: &'a [Sample], collector: &str) -> Vec<&'a Sample> {
        samples
            .iter()
            .filter(|s| s.desc().fq_name() == "pg_scrape_collector_success")
            .filter(|s| s.label("collector") == Some(collector))
            .collect()
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_new_uses_enabled_collectors_only() {
        let orchestrator = Orchestrator::new(&registry(), &[target("a")], &[]).unwrap();
        assert_eq!(orchestrator.collector_names(), vec!["nodata", "ok"]);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_new_applies_filter() {
        let orchestrator =
            Orchestrator::new(&registry(), &[target("a")], &["ok".to_string()]).unwrap();
        assert_eq!(orchestrator.collector_names(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_new_rejects_unknown_filter() {
        let result = Orchestrator::new(&registry(), &[target("a")], &["ghost".to_string()]);
        assert!(matches!(result, Err(OrchestratorError::Missing(ref n)) if n == "ghost"));
    }

    #[tokio::test]
    async fn test_new_rejects_disabled_filter() {
        let result = Orchestrator::new(&registry(), &[target("a")], &["off".to_string()]);
        assert!(matches!(result, Err(OrchestratorError::Disabled(ref n)) if n == "off"));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_forced_collector_becomes_available() {
        let mut registry = registry();
        registry
            .apply(&CollectorConfig::new().with_override("off", true))
            .unwrap();

        let orchestrator =
            Orchestrator::new(&registry, &[target("a")], &["off".to_string()]).unwrap();
        assert_eq!(orchestrator.collector_names(), vec!["off"]);
    }

    #[tokio::test]
    async fn test_new_rejects_malformed_target() {
        let bad = SecretString::from("postgres://u:p@host:port/db".to_string());
        let result = Orchestrator::new(&registry(), &[target("a"), bad], &[]);
        assert!(matches!(result, Err(OrchestratorError::Connection { .. })));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_duplicate_targets_collapse() {
        let orchestrator =
            Orchestrator::new(&registry(), &[target("a"), target("a"), target("b")], &[]).unwrap();
        assert_eq!(orchestrator.servers().len(), 2);
    }

    #[tokio::test]
    async fn test_distinct_targets_with_same_label_are_rejected() {
        let alice = SecretString::from("postgresql://alice@db1:5432/app".to_string());
        let bob = SecretString::from("postgresql://bob@db1:5432/app".to_string());

        let result = Orchestrator::new(&registry(), &[alice, bob], &[]);
        assert!(matches!(
            result,
            Err(OrchestratorError::DuplicateTarget(ref label)) if label == "db1:5432/app"
        ));

        let plain = "postgresql://exporter@db1:5432/app";
        let targets = [
            SecretString::from(plain.to_string()),
            SecretString::from(format!("{plain}?sslmode=require")),
        ];
        assert!(Orchestrator::new(&registry(), &targets, &[]).is_err());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_describe_is_independent_of_collectors() {
        let orchestrator =
            Orchestrator::new(&registry(), &[target("a")], &["ok".to_string()]).unwrap();
        let [duration, success] = orchestrator.describe();
        assert_eq!(duration.fq_name(), "pg_scrape_collector_duration_seconds");
        assert_eq!(success.fq_name(), "pg_scrape_collector_success");
        assert_eq!(success.variable_labels(), ["collector".to_string()]);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_collect_single_server_has_no_server_label() {
        let orchestrator = Orchestrator::new(&registry(), &[target("a")], &[]).unwrap();
        let samples = orchestrator.scrape(&ScrapeContext::new()).await;

        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.label("server").is_none()));

        let ok = success_of(&samples, "ok");
        assert_eq!(ok.len(), 1);
        assert!((ok.first().unwrap().value() - 1.0).abs() < f64::EPSILON);

        let nodata = success_of(&samples, "nodata");
        assert_eq!(nodata.len(), 1);
        assert!(nodata.first().unwrap().value().abs() < f64::EPSILON);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_collect_multi_server_tags_samples() {
        let orchestrator =
            Orchestrator::new(&registry(), &[target("a"), target("b")], &["ok".to_string()])
                .unwrap();
        let samples = orchestrator.scrape(&ScrapeContext::new()).await;

        let ok = success_of(&samples, "ok");
        let mut servers: Vec<_> = ok
            .iter()
            .filter_map(|s| s.label("server"))
            .collect();
        servers.sort_unstable();
        assert_eq!(servers, vec!["127.0.0.1:1/a", "127.0.0.1:1/b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[allow(clippy::unwrap_used)]
    async fn test_blocking_collector_does_not_hold_up_other_servers() {
        let rendezvous = Arc::new(Rendezvous {
            arrived: Mutex::new(0),
            all_here: Condvar::new(),
            expected: 2,
        });
        let mut registry = CollectorRegistry::new();
        registry
            .register("rendezvous", true, move |_span: &tracing::Span| {
                Ok(Arc::clone(&rendezvous) as Arc<dyn Collector>)
            })
            .unwrap();

        let orchestrator =
            Orchestrator::new(&registry, &[target("a"), target("b")], &[]).unwrap();
        let samples = orchestrator
            .scrape(&ScrapeContext::with_timeout(Duration::from_secs(10)))
            .await;

        let success = success_of(&samples, "rendezvous");
        assert_eq!(success.len(), 2);
        assert!(success.iter().all(|s| (s.value() - 1.0).abs() < f64::EPSILON));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_turns_hang_into_failure() {
        let server = Server::new(&target("a"));
        assert!(server.is_ok());
        let Ok(server) = server else { return };

        let (sink, mut receiver) = MetricSink::channel();
        let ctx = ScrapeContext::with_timeout(Duration::from_secs(5));

        execute(&ctx, "hang", &Hang, &server, &sink).await;

        let samples = receiver.drain();
        assert_eq!(samples.len(), 2);
        let success = success_of(&samples, "hang");
        assert_eq!(success.len(), 1);
        assert!(success.iter().all(|s| s.value().abs() < f64::EPSILON));

        let duration = samples
            .iter()
            .find(|s| s.desc().fq_name() == "pg_scrape_collector_duration_seconds")
            .map(Sample::value);
        assert!(duration.is_some_and(|d| (5.0..6.0).contains(&d)));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_close_releases_servers() {
        let orchestrator =
            Orchestrator::new(&registry(), &[target("a"), target("b")], &[]).unwrap();
        orchestrator.close().await;
        assert!(orchestrator.servers().iter().all(|server| server.is_closed()));
    }
}
