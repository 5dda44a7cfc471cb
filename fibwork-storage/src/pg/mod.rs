//! PostgreSQL backends.
//!
//! Connection pooling uses deadpool-postgres. The ledger, the UNLOGGED
//! result table, and the LISTEN/NOTIFY channel can all share one database.

mod cache;
mod channel;
mod ledger;

pub use cache::PgResultCache;
pub use channel::{ChannelReconnectPolicy, PgEventChannel};
pub use ledger::PgLedger;

use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use fibwork_core::StoreError;
use tokio_postgres::NoTls;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection and pool wait timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "fibwork".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FIBWORK_DB_HOST` (default: localhost)
    /// - `FIBWORK_DB_PORT` (default: 5432)
    /// - `FIBWORK_DB_NAME` (default: fibwork)
    /// - `FIBWORK_DB_USER` (default: postgres)
    /// - `FIBWORK_DB_PASSWORD` (default: empty)
    /// - `FIBWORK_DB_POOL_SIZE` (default: 16)
    /// - `FIBWORK_DB_TIMEOUT` seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("FIBWORK_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("FIBWORK_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("FIBWORK_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("FIBWORK_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("FIBWORK_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("FIBWORK_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("FIBWORK_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// The pool connects lazily; call a backend's `ping` to verify the
    /// database is reachable.
    pub fn create_pool(&self) -> Result<Pool, StoreError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Unavailable {
                reason: format!("Failed to create pool: {e}"),
            })
    }

    /// Settings for a dedicated, unpooled connection (used by LISTEN).
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password)
            .connect_timeout(self.timeout);
        cfg
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Map a pool checkout failure, keeping exhaustion distinguishable.
fn pool_error(err: deadpool_postgres::PoolError, waited: Duration) -> StoreError {
    tracing::error!("Connection pool error: {:?}", err);
    match err {
        deadpool_postgres::PoolError::Timeout(_) => StoreError::PoolExhausted { waited },
        deadpool_postgres::PoolError::Closed => StoreError::Unavailable {
            reason: "Database connection pool is closed".to_string(),
        },
        other => StoreError::Unavailable {
            reason: other.to_string(),
        },
    }
}

/// Map a query failure. The full error is logged; callers see a summary.
fn query_error(store: &'static str) -> impl Fn(tokio_postgres::Error) -> StoreError {
    move |err| {
        tracing::error!(store, "Database error: {:?}", err);
        StoreError::QueryFailed {
            store,
            reason: err
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| "connection error".to_string()),
        }
    }
}

/// Get a pooled connection, mapping checkout errors.
async fn get_conn(pool: &Pool, timeout: Duration) -> Result<deadpool_postgres::Object, StoreError> {
    pool.get().await.map_err(|e| pool_error(e, timeout))
}
