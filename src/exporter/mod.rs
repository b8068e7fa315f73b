//! HTTP surface: landing page, scrape endpoint and health.
//!
//! Every scrape builds a fresh `Orchestrator` from the shared registry (so
//! `collect[]` filters are validated per request), runs it under the
//! configured deadline and releases its server handles afterwards. The
//! exporter's own metrics live in a long-lived registry and are appended to
//! every successful scrape.

pub mod self_metrics;

use crate::built_info;
use crate::collectors::{
    CollectorRegistry, Orchestrator, OrchestratorError, ScrapeContext, exposition,
    server::target_label,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{RawQuery, State},
    http::{HeaderValue, Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use secrecy::{ExposeSecret, SecretString};
use self_metrics::ExporterMetrics;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug, error, info, info_span, warn};
use ulid::Ulid;

const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Settings for the HTTP surface.
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    pub telemetry_path: String,
    /// Deadline applied to every scrape, `None` for no deadline.
    pub scrape_timeout: Option<Duration>,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            telemetry_path: "/metrics".to_string(),
            scrape_timeout: Some(Duration::from_secs(10)),
        }
    }
}

struct Target {
    label: String,
    dsn: SecretString,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<CollectorRegistry>,
    targets: Arc<[Target]>,
    telemetry_path: Arc<str>,
    scrape_timeout: Option<Duration>,
    metrics: Arc<ExporterMetrics>,
}

#[derive(Clone, Copy, Default)]
struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Ulid::new().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Start the exporter and serve until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if a DSN is malformed, the listen address is invalid or
/// the server fails to bind.
pub async fn new(
    port: u16,
    listen: Option<String>,
    dsns: Vec<SecretString>,
    registry: CollectorRegistry,
    options: ExporterOptions,
) -> Result<()> {
    let app = app(dsns, registry, options)?;

    let listener = bind(port, listen).await?;
    let addr = listener.local_addr()?;

    info!(version = built_info::PKG_VERSION, %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the router without binding, so it can be driven directly.
///
/// # Errors
///
/// Returns an error if any DSN or the telemetry path is malformed, or if two
/// different DSNs resolve to the same target label.
pub fn app(
    dsns: Vec<SecretString>,
    registry: CollectorRegistry,
    options: ExporterOptions,
) -> Result<Router> {
    let ExporterOptions {
        telemetry_path,
        scrape_timeout,
    } = options;

    if !telemetry_path.starts_with('/') || telemetry_path == "/" || telemetry_path == "/health" {
        return Err(anyhow!("invalid telemetry path: {telemetry_path}"));
    }

    let mut seen = HashSet::new();
    let mut labels = HashMap::new();
    let mut targets = Vec::with_capacity(dsns.len());

    for (index, dsn) in dsns.into_iter().enumerate() {
        if !seen.insert(dsn.expose_secret().to_string()) {
            continue;
        }
        let label = target_label(&dsn)?;
        if let Some(first) = labels.insert(label.clone(), index) {
            return Err(OrchestratorError::DuplicateTarget(label)).with_context(|| {
                format!("DSN #{} and DSN #{} point at the same server", first + 1, index + 1)
            });
        }
        debug!(server = %label, "configured target");
        targets.push(Target { label, dsn });
    }

    let state = AppState {
        registry: Arc::new(registry),
        targets: targets.into(),
        telemetry_path: telemetry_path.as_str().into(),
        scrape_timeout,
        metrics: Arc::new(ExporterMetrics::new()?),
    };

    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUlid))
        .layer(TraceLayer::new_for_http().make_span_with(make_span))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::SERVER,
            HeaderValue::from_static(concat!("pg_exporter/", env!("CARGO_PKG_VERSION"))),
        ));

    Ok(Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route(&telemetry_path, get(metrics))
        .layer(layers)
        .with_state(state))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    info_span!(
        "http.request",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
        otel.kind = "server"
    )
}

async fn bind(port: u16, listen: Option<String>) -> Result<TcpListener> {
    if let Some(ip) = listen {
        let ip: IpAddr = ip
            .parse()
            .with_context(|| format!("invalid listen address: {ip}"))?;
        return Ok(TcpListener::bind(SocketAddr::new(ip, port)).await?);
    }

    // [::] accepts IPv4 too on dual-stack hosts
    match TcpListener::bind(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            warn!(error = %e, "IPv6 bind failed, falling back to 0.0.0.0");
            Ok(TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await?)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutting down");
}

async fn root(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>PostgreSQL exporter</title></head>\n<body>\n\
         <h1>PostgreSQL exporter</h1>\n<p><a href='{}'>Metrics</a></p>\n</body>\n</html>\n",
        state.telemetry_path
    ))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": built_info::PKG_VERSION,
        "commit": built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown"),
        "targets": state.targets.iter().map(|t| t.label.as_str()).collect::<Vec<_>>(),
        "collectors": state.registry.enabled_names(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `collect[]` filters and the optional `target` label of a scrape request.
#[derive(Debug, Default, PartialEq, Eq)]
struct ScrapeParams {
    filters: Vec<String>,
    target: Option<String>,
}

impl ScrapeParams {
    fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();

        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "collect[]" if !value.is_empty() => params.filters.push(value.into_owned()),
                "target" if !value.is_empty() => params.target = Some(value.into_owned()),
                _ => {}
            }
        }

        params
    }
}

async fn metrics(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let mut timer = state.metrics.start_scrape();
    let params = ScrapeParams::parse(query.as_deref());

    let targets: Vec<SecretString> = match params.target.as_deref() {
        Some(label) => match state.targets.iter().find(|t| t.label == label) {
            Some(target) => vec![SecretString::from(target.dsn.expose_secret().to_string())],
            None => {
                warn!(target = label, "scrape requested for unknown target");
                timer.fail();
                return (StatusCode::NOT_FOUND, format!("unknown target: {label}\n"))
                    .into_response();
            }
        },
        None => state
            .targets
            .iter()
            .map(|t| SecretString::from(t.dsn.expose_secret().to_string()))
            .collect(),
    };

    let orchestrator = match Orchestrator::new(&state.registry, &targets, &params.filters) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            let status = match &e {
                OrchestratorError::Missing(_) | OrchestratorError::Disabled(_) => {
                    StatusCode::BAD_REQUEST
                }
                OrchestratorError::Factory { .. }
                | OrchestratorError::Connection { .. }
                | OrchestratorError::DuplicateTarget(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(error = %e, %status, "failed to build orchestrator");
            timer.fail();
            return (status, format!("{e}\n")).into_response();
        }
    };

    let ctx = state
        .scrape_timeout
        .map_or_else(ScrapeContext::new, ScrapeContext::with_timeout);

    let samples = orchestrator.scrape(&ctx).await;
    orchestrator.close().await;

    debug!(samples = samples.len(), "scrape finished");

    match exposition::encode_with(&samples, state.metrics.gather()) {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE_TEXT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            timer.fail();
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n")).into_response()
        }
    }
}
