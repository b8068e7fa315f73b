#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::indexing_slicing)]

mod common;

use common::meta_samples;
use nix::unistd::geteuid;
use pg_exporter::collectors::{
    CollectorRegistry, Orchestrator, ScrapeContext, Server, config::CollectorConfig, exposition,
    util,
};
use secrecy::SecretString;
use std::env;
use std::path::Path;
use std::time::Duration;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::{core::IntoContainerPort, runners::AsyncRunner};

fn socket_exists(host: &str) -> bool {
    if let Some(path) = host.strip_prefix("unix://") {
        Path::new(path).exists()
    } else {
        true
    }
}

fn find_container_runtime() -> Option<String> {
    // Honor explicit DOCKER_HOST if present and reachable.
    if let Ok(existing) = env::var("DOCKER_HOST")
        && !existing.is_empty()
        && socket_exists(&existing)
    {
        return Some(existing);
    }

    // Prefer Podman sockets first, fall back to Docker socket.
    let uid = geteuid().as_raw();
    let candidates = [
        format!("unix:///run/user/{uid}/podman/podman.sock"),
        "unix:///run/podman/podman.sock".to_string(),
        "unix:///var/run/podman/podman.sock".to_string(),
        "unix:///var/run/docker.sock".to_string(),
    ];

    candidates.into_iter().find(|c| socket_exists(c))
}

#[tokio::test]
async fn collect_metrics_from_postgres_container() -> anyhow::Result<()> {
    let Some(docker_host) = find_container_runtime() else {
        eprintln!(
            "No container runtime socket found (checked Podman + Docker), skipping container integration test"
        );
        return Ok(());
    };

    // Safe because we control the variable name/value and keep it ASCII for the child processes.
    unsafe { env::set_var("DOCKER_HOST", &docker_host) };

    let container = match Postgres::default().start().await {
        Ok(container) => container,
        Err(e) => {
            eprintln!("Skipping container integration test: {e}");
            return Ok(());
        }
    };

    let port = container.get_host_port_ipv4(5432.tcp()).await?;
    let host = container.get_host().await?;
    let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
    let dsn = SecretString::from(url.clone());

    let mut registry = CollectorRegistry::with_builtin()?;
    registry.apply(&CollectorConfig::new().with_enabled(&["locks".to_string()]))?;

    let orchestrator = Orchestrator::new(&registry, &[dsn], &[])?;
    let samples = orchestrator
        .scrape(&ScrapeContext::with_timeout(Duration::from_secs(30)))
        .await;
    orchestrator.close().await;

    for collector in ["database", "locks", "postmaster", "stat_database"] {
        let success = meta_samples(&samples, "success", collector);
        assert_eq!(success.len(), 1, "{collector} should report once");
        assert!(
            (success[0].value() - 1.0).abs() < f64::EPSILON,
            "{collector} should succeed"
        );
    }

    // A fresh container is a primary: replication reports no data.
    let replication = meta_samples(&samples, "success", "replication");
    assert!(replication[0].value().abs() < f64::EPSILON);

    let text = exposition::encode(&samples)?;
    assert!(text.contains("pg_postmaster_start_time_seconds"));
    assert!(text.contains("pg_database_size_bytes{datname=\"postgres\"}"));
    assert!(text.contains("pg_stat_database_xact_commit{datname=\"postgres\"}"));
    assert!(!text.contains("pg_replication_lag_seconds"));

    // Queries run under a statement timeout derived from the scrape deadline.
    let server = Server::new(&SecretString::from(url))?;

    let mut tx = util::begin(&ScrapeContext::with_timeout(Duration::from_secs(30)), &server).await?;
    let bounded: String = sqlx::query_scalar("SHOW statement_timeout")
        .fetch_one(&mut *tx)
        .await?;
    drop(tx);
    assert_ne!(bounded, "0");

    let mut tx = util::begin(&ScrapeContext::new(), &server).await?;
    let unbounded: String = sqlx::query_scalar("SHOW statement_timeout")
        .fetch_one(&mut *tx)
        .await?;
    drop(tx);
    assert_eq!(unbounded, "0");

    server.close().await;

    Ok(())
}
