//! fibwork Storage - Capability Traits and Backends
//!
//! The gateway and the worker only see three traits: [`ResultCache`],
//! [`Ledger`], and [`EventChannel`]. Each has an in-memory backend for tests
//! and single-process runs; production backends live in [`lmdb`] and [`pg`].

pub mod config;
pub mod lmdb;
pub mod memory;
pub mod pg;
pub mod traits;

pub use config::{CacheBackend, ChannelBackend, LedgerBackend, StorageConfig};
pub use lmdb::{LmdbCacheError, LmdbResultCache};
pub use memory::{MemoryEventChannel, MemoryLedger, MemoryResultCache};
pub use pg::{ChannelReconnectPolicy, DbConfig, PgEventChannel, PgLedger, PgResultCache};
pub use traits::{EventChannel, Ledger, ResultCache, Subscription};
