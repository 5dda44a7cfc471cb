//! Ledger and outbox tables in PostgreSQL.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use fibwork_core::{Index, LedgerEntry, OutboxJob, StoreError, Timestamp};
use tokio_postgres::Row;

use super::{get_conn, query_error, DbConfig};
use crate::traits::Ledger;

const STORE: &str = "ledger";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS seen_indexes (
        id          BIGSERIAL PRIMARY KEY,
        number      INTEGER NOT NULL UNIQUE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE TABLE IF NOT EXISTS index_outbox (
        id            BIGSERIAL PRIMARY KEY,
        number        INTEGER NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        dispatched_at TIMESTAMPTZ
    );
    CREATE INDEX IF NOT EXISTS index_outbox_pending
        ON index_outbox (id) WHERE dispatched_at IS NULL;
";

const INSERT_ENTRY: &str =
    "INSERT INTO seen_indexes (number) VALUES ($1) ON CONFLICT (number) DO NOTHING";

/// Ledger backed by the `seen_indexes` table; uniqueness is enforced by the
/// database, so concurrent gateways cannot create duplicates.
#[derive(Clone)]
pub struct PgLedger {
    pool: Pool,
    timeout: Duration,
}

impl PgLedger {
    /// Create a new ledger over the given pool.
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create a ledger from configuration.
    pub fn from_config(config: &DbConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.create_pool()?, config.timeout))
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        conn.batch_execute(SCHEMA).await.map_err(query_error(STORE))
    }

    fn to_number(index: Index) -> Result<i32, StoreError> {
        i32::try_from(index.get()).map_err(|_| StoreError::Corrupt {
            store: STORE,
            reason: format!("index {index} exceeds INTEGER"),
        })
    }

    fn from_number(raw: i32) -> Result<u32, StoreError> {
        u32::try_from(raw).map_err(|_| StoreError::Corrupt {
            store: STORE,
            reason: format!("negative number {raw} in ledger"),
        })
    }

    fn parse_entry(row: &Row) -> Result<LedgerEntry, StoreError> {
        Ok(LedgerEntry {
            id: row.try_get("id").map_err(query_error(STORE))?,
            number: Self::from_number(row.try_get("number").map_err(query_error(STORE))?)?,
            created_at: row.try_get("created_at").map_err(query_error(STORE))?,
        })
    }

    fn parse_job(row: &Row) -> Result<OutboxJob, StoreError> {
        Ok(OutboxJob {
            id: row.try_get("id").map_err(query_error(STORE))?,
            number: Self::from_number(row.try_get("number").map_err(query_error(STORE))?)?,
            created_at: row.try_get("created_at").map_err(query_error(STORE))?,
            dispatched_at: row
                .try_get::<_, Option<Timestamp>>("dispatched_at")
                .map_err(query_error(STORE))?,
        })
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn insert_if_absent(&self, index: Index) -> Result<bool, StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        let number = Self::to_number(index)?;
        let inserted = conn
            .execute(INSERT_ENTRY, &[&number])
            .await
            .map_err(query_error(STORE))?;
        Ok(inserted == 1)
    }

    async fn list_ordered(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        let rows = conn
            .query(
                "SELECT id, number, created_at FROM seen_indexes ORDER BY number ASC",
                &[],
            )
            .await
            .map_err(query_error(STORE))?;
        rows.iter().map(Self::parse_entry).collect()
    }

    async fn insert_with_job(&self, index: Index) -> Result<i64, StoreError> {
        let mut conn = get_conn(&self.pool, self.timeout).await?;
        let number = Self::to_number(index)?;

        let tx = conn.transaction().await.map_err(query_error(STORE))?;
        tx.execute(INSERT_ENTRY, &[&number])
            .await
            .map_err(query_error(STORE))?;
        let row = tx
            .query_one(
                "INSERT INTO index_outbox (number) VALUES ($1) RETURNING id",
                &[&number],
            )
            .await
            .map_err(query_error(STORE))?;
        let job_id: i64 = row.try_get(0).map_err(query_error(STORE))?;
        tx.commit().await.map_err(|e| {
            tracing::error!("Outbox transaction commit failed: {:?}", e);
            StoreError::TransactionFailed {
                reason: "commit failed".to_string(),
            }
        })?;
        Ok(job_id)
    }

    async fn pending_jobs(&self, limit: usize) -> Result<Vec<OutboxJob>, StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conn
            .query(
                "SELECT id, number, created_at, dispatched_at FROM index_outbox \
                 WHERE dispatched_at IS NULL ORDER BY id ASC LIMIT $1",
                &[&limit],
            )
            .await
            .map_err(query_error(STORE))?;
        rows.iter().map(Self::parse_job).collect()
    }

    async fn mark_dispatched(&self, ids: &[i64]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = get_conn(&self.pool, self.timeout).await?;
        conn.execute(
            "UPDATE index_outbox SET dispatched_at = now() \
             WHERE id = ANY($1) AND dispatched_at IS NULL",
            &[&ids],
        )
        .await
        .map_err(query_error(STORE))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = get_conn(&self.pool, self.timeout).await?;
        conn.execute("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(query_error(STORE))
    }

    fn close(&self) {
        self.pool.close();
    }
}
