//! Postgres pool for the relay's message store.
//!
//! The pool is opened once at startup, the embedded schema under
//! `src/db/migrations` is applied to it, and the result is handed to
//! `PgStore`. A relay that cannot reach its database or bring the schema up
//! to date never starts listening.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::env_parse;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum DbInitError {
    #[error("could not connect to database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("schema migration failed: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),
}

/// Sizing for the shared pool.
///
/// A short acquire timeout keeps a saturated pool from stalling chat sends;
/// the store reports it as `StoreError::Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolSettings {
    /// Reads `DB_MAX_CONNECTIONS` and `DB_ACQUIRE_TIMEOUT_SECS`, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.max_connections).max(1),
            acquire_timeout: Duration::from_secs(env_parse(
                "DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_DB_ACQUIRE_TIMEOUT_SECS,
            )),
        }
    }
}

/// Open the message-store pool and apply pending migrations.
///
/// # Errors
///
/// `DbInitError::Connect` if the database is unreachable, `DbInitError::Migrate`
/// if the embedded schema cannot be applied.
pub async fn init_pool(database_url: &str, settings: PoolSettings) -> Result<PgPool, DbInitError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(DbInitError::Connect)?;

    sqlx::migrate!("src/db/migrations")
        .run(&pool)
        .await
        .map_err(DbInitError::Migrate)?;

    tracing::info!(
        max_connections = settings.max_connections,
        acquire_timeout_secs = settings.acquire_timeout.as_secs(),
        "message store ready"
    );
    Ok(pool)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
