use anyhow::{Context, Result};
use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use std::env;
use tracing::debug;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Map `-v` occurrences to a default filter directive.
#[must_use]
pub const fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber: `EnvFilter` (`RUST_LOG` wins over `-v`),
/// a fmt layer and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OTLP span
/// exporter.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be built or a global
/// subscriber is already installed.
pub fn init(verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity_level(verbose)));

    let otel_layer = match env::var(OTLP_ENDPOINT_ENV) {
        Ok(endpoint) if !endpoint.is_empty() => {
            let provider = tracer_provider(&endpoint)?;
            let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
            global::set_tracer_provider(provider);
            Some(tracing_opentelemetry::layer::<Registry>().with_tracer(tracer))
        }
        _ => None,
    };
    let otel_enabled = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .context("failed to install tracing subscriber")?;

    debug!(otel_enabled, "telemetry initialized");

    Ok(())
}

fn tracer_provider(endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to create OTLP span exporter")?;

    let resource = Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
