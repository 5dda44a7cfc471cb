//! The compute loop.
//!
//! A subscription task reads messages from the Event Channel into a bounded
//! queue. A dispatcher takes messages off the queue and runs each one under
//! a semaphore permit, so at most `concurrency` computations are in flight.
//! With one permit, messages are processed strictly in arrival order.
//!
//! Bad messages and cache failures are logged and counted; they never stop
//! the loop. Only a permanent channel failure does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fibwork_core::{fib, ChannelError, Index, IndexPolicy};
use fibwork_storage::{EventChannel, ResultCache, Subscription};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use crate::config::{OverflowPolicy, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for worker activity since startup.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    /// Messages read from the channel
    pub received: AtomicU64,
    /// Results written to the cache
    pub computed: AtomicU64,
    /// Messages that were not a valid index
    pub discarded: AtomicU64,
    /// Messages dropped because the queue was full
    pub dropped_overflow: AtomicU64,
    /// Results that could not be written
    pub cache_failures: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            received: self.received.load(Ordering::Relaxed),
            computed: self.computed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            cache_failures: self.cache_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerSnapshot {
    pub received: u64,
    pub computed: u64,
    pub discarded: u64,
    pub dropped_overflow: u64,
    pub cache_failures: u64,
}

// ============================================================================
// MESSAGE HANDLING
// ============================================================================

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The value was written to the cache.
    Computed { index: Index, value: u64 },
    /// The message was not an acceptable index.
    Discarded { reason: String },
    /// The value was computed but the cache write failed.
    CacheFailed { index: Index },
}

/// Parse a channel message and check it against `policy`.
pub fn parse_message(raw: &str, policy: &IndexPolicy) -> Result<Index, String> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("not an integer: {raw:?}"))?;
    policy.check(value).map_err(|e| e.to_string())
}

/// Stateless per-message processor shared by all in-flight tasks.
struct Processor {
    cache: Arc<dyn ResultCache>,
    policy: IndexPolicy,
    metrics: Arc<WorkerMetrics>,
}

impl Processor {
    async fn handle(&self, raw: &str) -> MessageOutcome {
        let index = match parse_message(raw, &self.policy) {
            Ok(index) => index,
            Err(reason) => {
                tracing::warn!(message = raw, reason = %reason, "Discarding message");
                self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
                return MessageOutcome::Discarded { reason };
            }
        };

        let value = match fib(index) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(index = %index, error = %e, "Discarding message");
                self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
                return MessageOutcome::Discarded {
                    reason: e.to_string(),
                };
            }
        };

        match self.cache.set(&index.as_key(), &value.to_string()).await {
            Ok(()) => {
                tracing::debug!(index = %index, value, "Stored result");
                self.metrics.computed.fetch_add(1, Ordering::Relaxed);
                MessageOutcome::Computed { index, value }
            }
            Err(e) => {
                tracing::error!(index = %index, error = %e, "Failed to store result");
                self.metrics.cache_failures.fetch_add(1, Ordering::Relaxed);
                MessageOutcome::CacheFailed { index }
            }
        }
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Compute worker bound to one cache and one channel.
pub struct Worker {
    channel: Arc<dyn EventChannel>,
    config: WorkerConfig,
    processor: Arc<Processor>,
}

impl Worker {
    pub fn new(
        cache: Arc<dyn ResultCache>,
        channel: Arc<dyn EventChannel>,
        config: WorkerConfig,
    ) -> Self {
        let processor = Arc::new(Processor {
            cache,
            policy: config.policy,
            metrics: Arc::new(WorkerMetrics::new()),
        });
        Self {
            channel,
            config,
            processor,
        }
    }

    /// Shared handle to this worker's counters.
    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        Arc::clone(&self.processor.metrics)
    }

    /// Process a single message outside the loop.
    pub async fn handle_message(&self, raw: &str) -> MessageOutcome {
        self.processor.handle(raw).await
    }

    /// Subscribe to the configured topic.
    ///
    /// Split from [`Worker::run_with`] so a caller can be sure the worker is
    /// listening before anything is published.
    pub async fn subscribe(&self) -> WorkerResult<Subscription> {
        let subscription = self.channel.subscribe(&self.config.topic).await?;
        tracing::info!(topic = %self.config.topic, "Worker subscribed");
        Ok(subscription)
    }

    /// Subscribe and run until shutdown or a permanent channel failure.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> WorkerResult<WorkerSnapshot> {
        let subscription = self.subscribe().await?;
        self.run_with(subscription, shutdown).await
    }

    /// Run on an existing subscription.
    ///
    /// On shutdown the queue is closed and everything already queued or in
    /// flight is finished before this returns. Callers that need a hard
    /// deadline wrap this in a timeout.
    pub async fn run_with(
        self,
        mut subscription: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<WorkerSnapshot> {
        let (queue_tx, queue_rx) = mpsc::channel::<String>(self.config.queue_capacity);
        let dispatcher = tokio::spawn(dispatch(
            queue_rx,
            Arc::clone(&self.processor),
            self.config.concurrency,
        ));
        let metrics = self.metrics();

        tracing::info!(
            topic = %self.config.topic,
            concurrency = self.config.concurrency,
            queue_capacity = self.config.queue_capacity,
            overflow = ?self.config.overflow,
            "Worker started"
        );

        let outcome: WorkerResult<()> = loop {
            let message = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break Ok(()),
                item = subscription.next() => match item {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => break Err(e.into()),
                    None => break Err(ChannelError::Closed.into()),
                },
            };
            metrics.received.fetch_add(1, Ordering::Relaxed);

            match self.config.overflow {
                OverflowPolicy::Reject => match queue_tx.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        tracing::warn!(message = %dropped, "Queue full; dropping message");
                        metrics.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        break Err(WorkerError::DispatcherStopped);
                    }
                },
                OverflowPolicy::Wait => {
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown) => break Ok(()),
                        sent = queue_tx.send(message) => {
                            if sent.is_err() {
                                break Err(WorkerError::DispatcherStopped);
                            }
                        }
                    }
                }
            }
        };

        drop(queue_tx);
        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "Worker dispatcher panicked");
        }

        let snapshot = metrics.snapshot();
        tracing::info!(
            received = snapshot.received,
            computed = snapshot.computed,
            discarded = snapshot.discarded,
            dropped_overflow = snapshot.dropped_overflow,
            cache_failures = snapshot.cache_failures,
            "Worker stopped"
        );

        outcome.map(|()| snapshot)
    }
}

/// Resolve once `true` is observed on `rx`. Never resolves if the sender is
/// dropped without signalling.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn dispatch(mut queue: mpsc::Receiver<String>, processor: Arc<Processor>, concurrency: usize) {
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut in_flight = JoinSet::new();

    while let Some(message) = queue.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let processor = Arc::clone(&processor);
        in_flight.spawn(async move {
            processor.handle(&message).await;
            drop(permit);
        });
        while let Some(done) = in_flight.try_join_next() {
            if let Err(e) = done {
                tracing::error!(error = %e, "Compute task panicked");
            }
        }
    }

    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            tracing::error!(error = %e, "Compute task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibwork_test_utils::fixtures::{memory_stores, wait_for_value};
    use fibwork_test_utils::generators::arb_valid_index;
    use fibwork_test_utils::{
        EventChannel, FailingResultCache, MemoryResultCache, ResultCache, ScriptedEventChannel,
    };
    use proptest::prelude::*;
    use std::time::Duration;

    fn worker_with(cache: Arc<dyn ResultCache>, channel: Arc<dyn EventChannel>) -> Worker {
        Worker::new(cache, channel, WorkerConfig::default())
    }

    #[test]
    fn test_parse_message_accepts_padded_integers() {
        let policy = IndexPolicy::default();
        assert_eq!(parse_message(" 12\n", &policy).map(Index::get), Ok(12));
        assert!(parse_message("abc", &policy).is_err());
        assert!(parse_message("3.5", &policy).is_err());
        assert!(parse_message("41", &policy).is_err());
        assert!(parse_message("-1", &policy).is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_accepts_every_valid_index(n in arb_valid_index()) {
            let parsed = parse_message(&n.to_string(), &IndexPolicy::default());
            prop_assert_eq!(parsed.map(|i| i64::from(i.get())), Ok(n));
        }
    }

    #[tokio::test]
    async fn test_handle_message_writes_result() {
        let cache = Arc::new(MemoryResultCache::new());
        let worker = worker_with(cache.clone(), Arc::new(ScriptedEventChannel::default()));

        let outcome = worker.handle_message("10").await;
        assert!(matches!(outcome, MessageOutcome::Computed { value: 89, .. }));
        assert_eq!(
            cache.get_all().await.unwrap().get("10").map(String::as_str),
            Some("89")
        );
    }

    #[tokio::test]
    async fn test_cache_failure_is_counted_not_raised() {
        let worker = worker_with(
            Arc::new(FailingResultCache::default()),
            Arc::new(ScriptedEventChannel::default()),
        );
        let outcome = worker.handle_message("5").await;
        assert!(matches!(outcome, MessageOutcome::CacheFailed { .. }));
        assert_eq!(worker.metrics().snapshot().cache_failures, 1);
    }

    #[tokio::test]
    async fn test_bad_message_does_not_stop_the_loop() {
        let stores = memory_stores();
        let worker = worker_with(stores.cache.clone(), stores.channel.clone());
        let metrics = worker.metrics();
        let subscription = worker.subscribe().await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run_with(subscription, shutdown_rx));

        stores.channel.publish("insert", "not-a-number").await.unwrap();
        stores.channel.publish("insert", "99").await.unwrap();
        stores.channel.publish("insert", "5").await.unwrap();

        assert!(wait_for_value(stores.cache.as_ref(), "5", "8", Duration::from_secs(5)).await);
        assert!(!stores.cache.get_all().await.unwrap().contains_key("99"));

        shutdown_tx.send(true).unwrap();
        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.received, 3);
        assert_eq!(snapshot.discarded, 2);
        assert_eq!(snapshot.computed, 1);
        assert_eq!(metrics.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_permanent_channel_failure_ends_run() {
        let channel = Arc::new(ScriptedEventChannel::new(vec![
            Ok("3".to_string()),
            Err(ChannelError::ReconnectsExhausted { attempts: 5 }),
        ]));
        let cache = Arc::new(MemoryResultCache::new());
        let worker = worker_with(cache.clone(), channel);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result = worker.run(shutdown_rx).await;
        assert!(matches!(
            result,
            Err(WorkerError::Channel(ChannelError::ReconnectsExhausted { attempts: 5 }))
        ));
        // The message queued before the failure is still processed.
        assert_eq!(
            cache.get_all().await.unwrap().get("3").map(String::as_str),
            Some("3")
        );
    }

    #[tokio::test]
    async fn test_reject_policy_drops_overflow() {
        // Dispatcher blocked on the single permit while the one-slot queue
        // is full: the rest must be dropped.
        let script = (0..20).map(|n| Ok((n % 40).to_string())).collect();
        let channel = Arc::new(ScriptedEventChannel::new(script));
        let cache = Arc::new(MemoryResultCache::new());
        let config = WorkerConfig {
            queue_capacity: 1,
            overflow: OverflowPolicy::Reject,
            ..WorkerConfig::default()
        };
        let worker = Worker::new(cache, channel, config);
        let metrics = worker.metrics();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result = worker.run(shutdown_rx).await;
        assert!(matches!(result, Err(WorkerError::Channel(ChannelError::Closed))));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 20);
        assert!(snapshot.dropped_overflow >= 1);
        assert_eq!(snapshot.computed + snapshot.dropped_overflow, 20);
    }
}
