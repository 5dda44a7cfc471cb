//! Capability traits for the three stores the pipeline depends on.
//!
//! Implementations must be thread-safe; the gateway shares one instance of
//! each across all request handlers.

use async_trait::async_trait;
use fibwork_core::{ChannelError, Index, LedgerEntry, OutboxJob, ResultMap, StoreError};
use futures_util::stream::BoxStream;

/// Stream of message bodies received on one topic.
///
/// An `Err` item means the subscription failed permanently; the stream ends
/// right after it.
pub type Subscription = BoxStream<'static, Result<String, ChannelError>>;

/// Fast key/value store for placeholders and computed results.
///
/// No expiry and no eviction: an entry lives until it is overwritten.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Read every entry. An empty cache yields an empty map.
    async fn get_all(&self) -> Result<ResultMap, StoreError>;

    /// Insert or overwrite one entry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Cheap liveness probe used by readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Release pooled connections. Further calls fail.
    fn close(&self) {}
}

/// Durable, duplicate-rejecting record of requested indexes.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record `index` unless it is already present.
    ///
    /// Returns `true` if a new entry was written.
    async fn insert_if_absent(&self, index: Index) -> Result<bool, StoreError>;

    /// All entries ordered by `number` ascending.
    async fn list_ordered(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Record `index` (idempotently) and enqueue an outbox job for it in one
    /// atomic step. Returns the job id.
    async fn insert_with_job(&self, index: Index) -> Result<i64, StoreError>;

    /// Up to `limit` undispatched jobs, oldest first.
    async fn pending_jobs(&self, limit: usize) -> Result<Vec<OutboxJob>, StoreError>;

    /// Mark jobs as published. Returns how many rows changed.
    async fn mark_dispatched(&self, ids: &[i64]) -> Result<u64, StoreError>;

    /// Cheap liveness probe used by readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release pooled connections. Further calls fail.
    fn close(&self) {}
}

/// Named publish/subscribe topics with at-most-once delivery.
///
/// A message published while nobody is subscribed is dropped.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), ChannelError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, ChannelError>;

    /// Check that messages can currently be published.
    async fn ping(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Release the publishing connection pool. Live subscriptions end on
    /// their own when dropped.
    fn close(&self) {}
}
