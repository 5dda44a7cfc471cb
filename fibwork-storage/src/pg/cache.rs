//! Result Cache on a PostgreSQL table.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use fibwork_core::{ResultMap, StoreError};

use super::{get_conn, query_error, DbConfig};
use crate::traits::ResultCache;

const STORE: &str = "cache";

/// Result cache on an UNLOGGED table: fast writes, contents may be lost on a
/// database crash, which matches a cache's contract.
#[derive(Clone)]
pub struct PgResultCache {
    pool: Pool,
    timeout: Duration,
}

impl PgResultCache {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.create_pool()?, config.timeout))
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        conn.batch_execute(
            "CREATE UNLOGGED TABLE IF NOT EXISTS fib_results (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .await
        .map_err(query_error(STORE))
    }
}

#[async_trait]
impl ResultCache for PgResultCache {
    async fn get_all(&self) -> Result<ResultMap, StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        let rows = conn
            .query("SELECT key, value FROM fib_results", &[])
            .await
            .map_err(query_error(STORE))?;

        let mut out = ResultMap::new();
        for row in rows {
            let key: String = row.try_get(0).map_err(query_error(STORE))?;
            let value: String = row.try_get(1).map_err(query_error(STORE))?;
            out.insert(key, value);
        }
        Ok(out)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        conn.execute(
            "INSERT INTO fib_results (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            &[&key, &value],
        )
        .await
        .map(|_| ())
        .map_err(query_error(STORE))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        conn.execute("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(query_error(STORE))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn close(&self) {
        self.pool.close();
    }
}
