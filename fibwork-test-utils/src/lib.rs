//! fibwork Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Store doubles that fail on demand or record what they see
//! - Proptest generators for index inputs
//! - Fixtures wiring up in-memory backends

pub use fibwork_core::{
    fib, ChannelError, Index, IndexPolicy, LedgerEntry, OutboxJob, ResultMap, StoreError,
    DEFAULT_TOPIC, PLACEHOLDER,
};
pub use fibwork_storage::{
    EventChannel, Ledger, MemoryEventChannel, MemoryLedger, MemoryResultCache, ResultCache,
    Subscription,
};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

// ============================================================================
// STORE DOUBLES
// ============================================================================

fn unavailable() -> StoreError {
    StoreError::Unavailable {
        reason: "injected failure".to_string(),
    }
}

/// Result cache whose every call fails.
#[derive(Debug, Default)]
pub struct FailingResultCache {
    pub calls: AtomicU64,
}

#[async_trait]
impl ResultCache for FailingResultCache {
    async fn get_all(&self) -> Result<ResultMap, StoreError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(unavailable())
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(unavailable())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(unavailable())
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Ledger whose every call fails with the configured error.
#[derive(Debug)]
pub struct FailingLedger {
    error: StoreError,
}

impl FailingLedger {
    pub fn new(error: StoreError) -> Self {
        Self { error }
    }

    /// Fails the way an exhausted connection pool does.
    pub fn pool_exhausted() -> Self {
        Self::new(StoreError::PoolExhausted {
            waited: Duration::from_secs(30),
        })
    }
}

impl Default for FailingLedger {
    fn default() -> Self {
        Self::new(unavailable())
    }
}

#[async_trait]
impl Ledger for FailingLedger {
    async fn insert_if_absent(&self, _index: Index) -> Result<bool, StoreError> {
        Err(self.error.clone())
    }

    async fn list_ordered(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        Err(self.error.clone())
    }

    async fn insert_with_job(&self, _index: Index) -> Result<i64, StoreError> {
        Err(self.error.clone())
    }

    async fn pending_jobs(&self, _limit: usize) -> Result<Vec<OutboxJob>, StoreError> {
        Err(self.error.clone())
    }

    async fn mark_dispatched(&self, _ids: &[i64]) -> Result<u64, StoreError> {
        Err(self.error.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(self.error.clone())
    }
}

/// Event channel that records publishes and can be told to fail them.
///
/// Successful publishes are forwarded to an inner [`MemoryEventChannel`], so
/// subscriptions behave normally.
#[derive(Debug, Default)]
pub struct RecordingEventChannel {
    inner: MemoryEventChannel,
    published: Mutex<Vec<(String, String)>>,
    failures_left: AtomicU32,
}

impl RecordingEventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publishes.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Messages successfully published, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventChannel for RecordingEventChannel {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), ChannelError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ChannelError::PublishFailed {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if let Ok(mut guard) = self.published.lock() {
            guard.push((topic.to_string(), message.to_string()));
        }
        self.inner.publish(topic, message).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, ChannelError> {
        self.inner.subscribe(topic).await
    }
}

/// Event channel whose subscription replays a fixed script of items and
/// then ends.
#[derive(Debug, Default)]
pub struct ScriptedEventChannel {
    script: Mutex<Vec<Result<String, ChannelError>>>,
}

impl ScriptedEventChannel {
    pub fn new(script: Vec<Result<String, ChannelError>>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl EventChannel for ScriptedEventChannel {
    async fn publish(&self, _topic: &str, _message: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> Result<Subscription, ChannelError> {
        let items = self
            .script
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .map_err(|_| ChannelError::Closed)?;
        Ok(futures_util::stream::iter(items).boxed())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for index inputs.

    use proptest::prelude::*;

    /// Indexes accepted by the default policy.
    pub fn arb_valid_index() -> impl Strategy<Value = i64> {
        0i64..=40
    }

    /// Integers above the default bound.
    pub fn arb_too_large() -> impl Strategy<Value = i64> {
        41i64..=1_000_000
    }

    /// Negative integers.
    pub fn arb_too_small() -> impl Strategy<Value = i64> {
        -1_000_000i64..=-1
    }

    /// Text with a valid integer prefix followed by junk, e.g. `"12abc"`.
    pub fn arb_integer_with_suffix() -> impl Strategy<Value = String> {
        (0i64..=40, "[a-z]{1,4}").prop_map(|(n, junk)| format!("{n}{junk}"))
    }

    /// In-range decimals with a non-zero fraction, e.g. `"3.5"`.
    pub fn arb_fractional() -> impl Strategy<Value = String> {
        (0i64..40, 1u32..=9).prop_map(|(n, frac)| format!("{n}.{frac}"))
    }

    /// Text with no leading integer at all.
    pub fn arb_malformed() -> impl Strategy<Value = String> {
        "[a-zA-Z_][a-zA-Z0-9_]{0,8}"
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built in-memory wiring.

    use super::*;

    /// Accept `n` under the default policy. Panics if out of range.
    pub fn index(n: i64) -> Index {
        IndexPolicy::default()
            .check(n)
            .unwrap_or_else(|e| panic!("fixture index {n} rejected: {e}"))
    }

    /// One instance of every in-memory backend.
    pub struct MemoryStores {
        pub cache: Arc<MemoryResultCache>,
        pub ledger: Arc<MemoryLedger>,
        pub channel: Arc<MemoryEventChannel>,
    }

    pub fn memory_stores() -> MemoryStores {
        MemoryStores {
            cache: Arc::new(MemoryResultCache::new()),
            ledger: Arc::new(MemoryLedger::new()),
            channel: Arc::new(MemoryEventChannel::default()),
        }
    }

    /// Poll `cache` until `key` holds `expected` or `timeout` elapses.
    pub async fn wait_for_value(
        cache: &dyn ResultCache,
        key: &str,
        expected: &str,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(all) = cache.get_all().await {
                if all.get(key).map(String::as_str) == Some(expected) {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
