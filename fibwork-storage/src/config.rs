//! Backend selection shared by the gateway and the worker binaries.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use fibwork_core::{ChannelError, ConfigError, StoreError};
use tracing::info;

use crate::lmdb::LmdbResultCache;
use crate::memory::{MemoryEventChannel, MemoryLedger, MemoryResultCache};
use crate::pg::{ChannelReconnectPolicy, DbConfig, PgEventChannel, PgLedger, PgResultCache};
use crate::traits::{EventChannel, Ledger, ResultCache};

/// Default LMDB directory.
pub const DEFAULT_CACHE_PATH: &str = "./data/results";

/// Default LMDB map size in megabytes.
pub const DEFAULT_CACHE_MAX_SIZE_MB: usize = 64;

/// Where the Result Cache lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    #[default]
    Postgres,
    Memory,
    Lmdb,
}

/// Where the Ledger lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerBackend {
    #[default]
    Postgres,
    Memory,
}

/// Which Event Channel implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelBackend {
    #[default]
    Postgres,
    Memory,
}

fn invalid_backend(field: &str, value: &str, allowed: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: format!("expected one of: {allowed}"),
    }
}

impl FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            "lmdb" => Ok(Self::Lmdb),
            _ => Err(invalid_backend("cache_backend", s, "postgres, memory, lmdb")),
        }
    }
}

impl FromStr for LedgerBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(invalid_backend("ledger_backend", s, "postgres, memory")),
        }
    }
}

impl FromStr for ChannelBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(invalid_backend("channel_backend", s, "postgres, memory")),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub cache: CacheBackend,
    pub ledger: LedgerBackend,
    pub channel: ChannelBackend,
    pub cache_path: PathBuf,
    pub cache_max_size_mb: usize,
    pub db: DbConfig,
    pub reconnect: ChannelReconnectPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache: CacheBackend::default(),
            ledger: LedgerBackend::default(),
            channel: ChannelBackend::default(),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            cache_max_size_mb: DEFAULT_CACHE_MAX_SIZE_MB,
            db: DbConfig::default(),
            reconnect: ChannelReconnectPolicy::default(),
        }
    }
}

impl StorageConfig {
    /// All backends in memory. Only useful within one process.
    pub fn in_memory() -> Self {
        Self {
            cache: CacheBackend::Memory,
            ledger: LedgerBackend::Memory,
            channel: ChannelBackend::Memory,
            ..Self::default()
        }
    }

    /// Load from environment variables.
    ///
    /// # Environment Variables
    /// - `FIBWORK_CACHE_BACKEND`: postgres, memory, or lmdb (default: postgres)
    /// - `FIBWORK_LEDGER_BACKEND`: postgres or memory (default: postgres)
    /// - `FIBWORK_CHANNEL_BACKEND`: postgres or memory (default: postgres)
    /// - `FIBWORK_CACHE_PATH`: LMDB directory (default: ./data/results)
    /// - `FIBWORK_CACHE_MAX_SIZE_MB`: LMDB map size (default: 64)
    /// - `FIBWORK_DB_*`: see [`DbConfig::from_env`]
    /// - `FIBWORK_CHANNEL_*`: see [`ChannelReconnectPolicy::from_env`]
    ///
    /// An unknown backend name is an error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache = match std::env::var("FIBWORK_CACHE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => CacheBackend::default(),
        };
        let ledger = match std::env::var("FIBWORK_LEDGER_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => LedgerBackend::default(),
        };
        let channel = match std::env::var("FIBWORK_CHANNEL_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => ChannelBackend::default(),
        };

        Ok(Self {
            cache,
            ledger,
            channel,
            cache_path: std::env::var("FIBWORK_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_PATH)),
            cache_max_size_mb: std::env::var("FIBWORK_CACHE_MAX_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|mb| *mb > 0)
                .unwrap_or(DEFAULT_CACHE_MAX_SIZE_MB),
            db: DbConfig::from_env(),
            reconnect: ChannelReconnectPolicy::from_env(),
        })
    }

    /// Open the Result Cache, creating tables if needed and checking it
    /// responds.
    pub async fn open_cache(&self) -> Result<Arc<dyn ResultCache>, StoreError> {
        let cache: Arc<dyn ResultCache> = match self.cache {
            CacheBackend::Memory => Arc::new(MemoryResultCache::new()),
            CacheBackend::Lmdb => Arc::new(LmdbResultCache::open(
                &self.cache_path,
                self.cache_max_size_mb,
            )?),
            CacheBackend::Postgres => {
                let cache = PgResultCache::from_config(&self.db)?;
                cache.ensure_schema().await?;
                Arc::new(cache)
            }
        };
        cache.ping().await?;
        info!(backend = cache.backend_name(), "Result cache ready");
        Ok(cache)
    }

    /// Open the Ledger, creating tables if needed and checking it responds.
    pub async fn open_ledger(&self) -> Result<Arc<dyn Ledger>, StoreError> {
        let ledger: Arc<dyn Ledger> = match self.ledger {
            LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
            LedgerBackend::Postgres => {
                let ledger = PgLedger::from_config(&self.db)?;
                ledger.ensure_schema().await?;
                Arc::new(ledger)
            }
        };
        ledger.ping().await?;
        info!(backend = ?self.ledger, "Ledger ready");
        Ok(ledger)
    }

    /// Open the Event Channel and check it can publish.
    pub async fn open_channel(&self) -> Result<Arc<dyn EventChannel>, ChannelError> {
        let channel: Arc<dyn EventChannel> = match self.channel {
            ChannelBackend::Memory => Arc::new(MemoryEventChannel::default()),
            ChannelBackend::Postgres => Arc::new(
                PgEventChannel::from_config(&self.db, self.reconnect).map_err(|e| {
                    ChannelError::Unavailable {
                        reason: e.to_string(),
                    }
                })?,
            ),
        };
        channel.ping().await?;
        info!(backend = ?self.channel, "Event channel ready");
        Ok(channel)
    }
}
