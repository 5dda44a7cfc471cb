//! In-memory backends.
//!
//! Used by tests and by single-process deployments where the worker runs
//! inside the gateway. Nothing here survives a restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use fibwork_core::{ChannelError, Index, LedgerEntry, OutboxJob, ResultMap, StoreError};
use futures_util::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::traits::{EventChannel, Ledger, ResultCache, Subscription};

// ============================================================================
// RESULT CACHE
// ============================================================================

/// Result cache backed by a concurrent hash map.
#[derive(Debug, Default)]
pub struct MemoryResultCache {
    entries: DashMap<String, String>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get_all(&self) -> Result<ResultMap, StoreError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeMap<u32, LedgerEntry>,
    /// Pending jobs only, keyed by id; dispatched jobs are dropped.
    jobs: BTreeMap<i64, OutboxJob>,
    next_entry_id: i64,
    next_job_id: i64,
}

impl LedgerState {
    fn insert(&mut self, index: Index) -> bool {
        if self.entries.contains_key(&index.get()) {
            return false;
        }
        self.next_entry_id += 1;
        self.entries.insert(
            index.get(),
            LedgerEntry {
                id: self.next_entry_id,
                number: index.get(),
                created_at: Utc::now(),
            },
        );
        true
    }
}

/// Ledger kept in a `BTreeMap`, so listing is naturally ordered by number.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert_if_absent(&self, index: Index) -> Result<bool, StoreError> {
        Ok(self.state.write().await.insert(index))
    }

    async fn list_ordered(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self.state.read().await.entries.values().cloned().collect())
    }

    async fn insert_with_job(&self, index: Index) -> Result<i64, StoreError> {
        // One write guard covers both inserts, so readers never see half of it.
        let mut state = self.state.write().await;
        state.insert(index);
        state.next_job_id += 1;
        let id = state.next_job_id;
        state.jobs.insert(
            id,
            OutboxJob {
                id,
                number: index.get(),
                created_at: Utc::now(),
                dispatched_at: None,
            },
        );
        Ok(id)
    }

    async fn pending_jobs(&self, limit: usize) -> Result<Vec<OutboxJob>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .jobs
            .values()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_dispatched(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let changed = ids.iter().filter(|&&id| state.jobs.remove(&id).is_some()).count();
        Ok(changed as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// EVENT CHANNEL
// ============================================================================

/// Default per-topic buffer for [`MemoryEventChannel`].
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Pub/sub over tokio broadcast channels, one per topic.
///
/// A subscriber that falls more than `capacity` messages behind loses the
/// oldest ones, which is within the at-most-once contract.
#[derive(Debug)]
pub struct MemoryEventChannel {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl Default for MemoryEventChannel {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl MemoryEventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn receiver_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventChannel for MemoryEventChannel {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), ChannelError> {
        let Some(tx) = self.topics.get(topic) else {
            debug!(topic, "No subscribers for message");
            return Ok(());
        };
        match tx.send(message.to_string()) {
            Ok(receivers) => debug!(topic, receivers, "Published message"),
            Err(_) => debug!(topic, "No subscribers for message"),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, ChannelError> {
        let rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let topic = topic.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let topic = topic.clone();
            async move {
                match item {
                    Ok(message) => Some(Ok(message)),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "Subscriber lagged; messages dropped");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibwork_core::IndexPolicy;

    fn index(n: i64) -> Index {
        IndexPolicy::default().check(n).unwrap()
    }

    #[tokio::test]
    async fn test_cache_overwrites_and_lists() {
        let cache = MemoryResultCache::new();
        assert!(cache.get_all().await.unwrap().is_empty());

        cache.set("5", "Nothing yet!").await.unwrap();
        cache.set("5", "8").await.unwrap();
        cache.set("3", "3").await.unwrap();

        let all = cache.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("5").map(String::as_str), Some("8"));
    }

    #[tokio::test]
    async fn test_ledger_is_idempotent_and_ordered() {
        let ledger = MemoryLedger::new();
        assert!(ledger.insert_if_absent(index(9)).await.unwrap());
        assert!(ledger.insert_if_absent(index(2)).await.unwrap());
        assert!(!ledger.insert_if_absent(index(9)).await.unwrap());
        assert!(ledger.insert_if_absent(index(0)).await.unwrap());

        let numbers: Vec<u32> = ledger
            .list_ordered()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.number)
            .collect();
        assert_eq!(numbers, vec![0, 2, 9]);
    }

    #[tokio::test]
    async fn test_outbox_jobs_lifecycle() {
        let ledger = MemoryLedger::new();
        let first = ledger.insert_with_job(index(4)).await.unwrap();
        let second = ledger.insert_with_job(index(4)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(ledger.list_ordered().await.unwrap().len(), 1);

        let pending = ledger.pending_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 2);

        assert_eq!(ledger.mark_dispatched(&[first]).await.unwrap(), 1);
        assert_eq!(ledger.mark_dispatched(&[first]).await.unwrap(), 0);

        let pending = ledger.pending_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second);
    }

    #[tokio::test]
    async fn test_dispatched_jobs_are_not_retained() {
        let ledger = MemoryLedger::new();
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(ledger.insert_with_job(index(n)).await.unwrap());
        }
        assert_eq!(ledger.mark_dispatched(&ids[..3]).await.unwrap(), 3);
        assert_eq!(ledger.state.read().await.jobs.len(), 2);

        let pending: Vec<i64> = ledger
            .pending_jobs(10)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(pending, ids[3..].to_vec());
    }

    #[tokio::test]
    async fn test_channel_delivers_to_subscriber() {
        let channel = MemoryEventChannel::default();
        let mut sub = channel.subscribe("insert").await.unwrap();
        assert_eq!(channel.receiver_count("insert"), 1);

        channel.publish("insert", "7").await.unwrap();
        channel.publish("other", "8").await.unwrap();
        channel.publish("insert", "9").await.unwrap();

        assert_eq!(sub.next().await, Some(Ok("7".to_string())));
        assert_eq!(sub.next().await, Some(Ok("9".to_string())));
    }

    #[tokio::test]
    async fn test_channel_drops_messages_without_subscribers() {
        let channel = MemoryEventChannel::default();
        channel.publish("insert", "1").await.unwrap();

        let mut sub = channel.subscribe("insert").await.unwrap();
        channel.publish("insert", "2").await.unwrap();
        assert_eq!(sub.next().await, Some(Ok("2".to_string())));
    }
}
