//! LMDB-backed result cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key/value store. LMDB environments can be opened by several processes on
//! the same host, so a gateway and a worker sharing a volume see one cache.
//!
//! Reads use a read transaction; each `set` commits its own write
//! transaction, so a crash never leaves a half-written value behind.
//! Transactions run on the blocking pool since a commit syncs to disk.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fibwork_core::{ResultMap, StoreError};
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};

use crate::traits::ResultCache;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StoreError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Transaction(reason) => StoreError::TransactionFailed { reason },
            other => StoreError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// Name of the LMDB database holding results.
const RESULTS_DB: &str = "results";

/// Result cache stored in an LMDB environment.
pub struct LmdbResultCache {
    inner: Arc<LmdbInner>,
}

struct LmdbInner {
    env: Env,
    db: Database<Str, Str>,
    writes: AtomicU64,
}

impl LmdbResultCache {
    /// Open (or create) the cache under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment/database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per process for this path and
        // the memory map is never modified outside LMDB transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, Some(RESULTS_DB))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(LmdbInner {
                env,
                db,
                writes: AtomicU64::new(0),
            }),
        })
    }

    /// Writes committed through this handle since it was opened.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    /// Run `op` against the environment on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbInner) -> Result<T, LmdbCacheError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: format!("LMDB task failed: {e}"),
            })?
            .map_err(StoreError::from)
    }
}

impl LmdbInner {
    fn read_all(&self) -> Result<ResultMap, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut out = ResultMap::new();
        for entry in iter {
            let (key, value) = entry.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            out.insert(key.to_string(), value.to_string());
        }
        Ok(out)
    }

    fn write_one(&self, key: &str, value: &str) -> Result<(), LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key, value)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl ResultCache for LmdbResultCache {
    async fn get_all(&self) -> Result<ResultMap, StoreError> {
        self.blocking(LmdbInner::read_all).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.blocking(move |inner| inner.write_one(&key, &value)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.blocking(|inner| {
            inner
                .env
                .read_txn()
                .map(|_| ())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "lmdb"
    }
}
