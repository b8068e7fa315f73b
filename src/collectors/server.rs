use crate::collectors::error::OrchestratorError;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

const MAX_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one monitored PostgreSQL server.
///
/// Wraps a lazily connected pool: building a handle only validates the
/// descriptor, the first query opens the connection. Owned by exactly one
/// orchestrator.
#[derive(Debug)]
pub struct Server {
    label: String,
    pool: PgPool,
    closed: AtomicBool,
}

impl Server {
    /// Build a handle from a connection descriptor (`postgres://` URL).
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Connection` if the descriptor cannot be
    /// parsed into connect options.
    pub fn new(dsn: &SecretString) -> Result<Self, OrchestratorError> {
        let options = parse_dsn(dsn)?;
        let label = server_label(&options);

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(0)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        debug!(server = %label, "created server handle");

        Ok(Self {
            label,
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Credential-free identifier, `host:port/database`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release pooled connections. Calling it more than once is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.close().await;
        debug!(server = %self.label, "closed server handle");
    }
}

/// Label a descriptor would get as a `Server`, without creating a pool.
///
/// # Errors
///
/// Returns `OrchestratorError::Connection` if the descriptor is malformed.
pub fn target_label(dsn: &SecretString) -> Result<String, OrchestratorError> {
    parse_dsn(dsn).map(|options| server_label(&options))
}

fn parse_dsn(dsn: &SecretString) -> Result<PgConnectOptions, OrchestratorError> {
    PgConnectOptions::from_str(dsn.expose_secret()).map_err(|source| {
        OrchestratorError::Connection {
            label: redacted_label(dsn.expose_secret()),
            source,
        }
    })
}

fn server_label(options: &PgConnectOptions) -> String {
    let host = options
        .get_socket()
        .map_or_else(|| options.get_host().to_string(), |path| path.display().to_string());
    let database = options.get_database().unwrap_or("postgres");
    format!("{host}:{}/{database}", options.get_port())
}

/// Best-effort label for an unparsable descriptor: drops everything before
/// `@` so credentials never reach logs or error messages.
fn redacted_label(dsn: &str) -> String {
    dsn.rsplit_once('@')
        .map_or_else(|| "<redacted>".to_string(), |(_, rest)| rest.to_string())
}
