//! Outbox Relay Background Task
//!
//! In outbox dispatch mode a submission writes its Ledger Entry and an
//! Outbox Job in one transaction and leaves publishing to this task. Every
//! tick it fetches the oldest pending jobs, publishes each index to the
//! Event Channel, and marks the published ones dispatched.
//!
//! A publish failure ends the batch. That job and everything after it stay
//! pending and are retried on the next tick, so a job is marked dispatched
//! only after its message was handed to the channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibwork_storage::{EventChannel, Ledger};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::telemetry::metrics;

/// Default time between relay cycles.
pub const DEFAULT_RELAY_INTERVAL_MS: u64 = 500;

/// Default number of jobs fetched per cycle.
pub const DEFAULT_RELAY_BATCH_SIZE: usize = 100;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the outbox relay.
#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    /// How often to look for pending jobs (default: 500 ms)
    pub interval: Duration,

    /// Maximum jobs published per cycle (default: 100)
    pub batch_size: usize,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_RELAY_INTERVAL_MS),
            batch_size: DEFAULT_RELAY_BATCH_SIZE,
        }
    }
}

impl OutboxRelayConfig {
    /// Create OutboxRelayConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FIBWORK_RELAY_INTERVAL_MS`: Cycle interval (default: 500)
    /// - `FIBWORK_RELAY_BATCH_SIZE`: Jobs per cycle (default: 100)
    ///
    /// Zero or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let interval = Duration::from_millis(
            std::env::var("FIBWORK_RELAY_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_RELAY_INTERVAL_MS),
        );

        let batch_size = std::env::var("FIBWORK_RELAY_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_RELAY_BATCH_SIZE);

        Self {
            interval,
            batch_size,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for relay activity.
#[derive(Debug, Default)]
pub struct OutboxRelayMetrics {
    /// Jobs published and marked dispatched
    pub jobs_relayed: AtomicU64,

    /// Publishes that failed and left a job pending
    pub publish_failures: AtomicU64,

    /// Ledger reads or writes that failed
    pub store_errors: AtomicU64,

    /// Completed cycles
    pub cycles: AtomicU64,
}

impl OutboxRelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> OutboxRelaySnapshot {
        OutboxRelaySnapshot {
            jobs_relayed: self.jobs_relayed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRelaySnapshot {
    pub jobs_relayed: u64,
    pub publish_failures: u64,
    pub store_errors: u64,
    pub cycles: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run the relay until the shutdown signal is received.
///
/// Returns the metrics collected during the task's lifetime.
pub async fn outbox_relay_task(
    ledger: Arc<dyn Ledger>,
    channel: Arc<dyn EventChannel>,
    topic: String,
    config: OutboxRelayConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<OutboxRelayMetrics> {
    let metrics = Arc::new(OutboxRelayMetrics::new());

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_ms = config.interval.as_millis() as u64,
        batch_size = config.batch_size,
        topic = %topic,
        "Outbox relay started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Outbox relay shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                relay_once(ledger.as_ref(), channel.as_ref(), &topic, config.batch_size, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        jobs_relayed = snapshot.jobs_relayed,
        publish_failures = snapshot.publish_failures,
        store_errors = snapshot.store_errors,
        cycles = snapshot.cycles,
        "Outbox relay completed"
    );

    metrics
}

/// Run one relay cycle. Returns how many jobs were marked dispatched.
pub async fn relay_once(
    ledger: &dyn Ledger,
    channel: &dyn EventChannel,
    topic: &str,
    batch_size: usize,
    metrics: &OutboxRelayMetrics,
) -> u64 {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    record_prometheus("cycle", 1);

    let jobs = match ledger.pending_jobs(batch_size).await {
        Ok(jobs) => jobs,
        Err(e) => {
            metrics.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "Failed to fetch pending outbox jobs");
            return 0;
        }
    };
    if jobs.is_empty() {
        return 0;
    }

    let mut published = Vec::with_capacity(jobs.len());
    for job in &jobs {
        match channel.publish(topic, &job.number.to_string()).await {
            Ok(()) => published.push(job.id),
            Err(e) => {
                metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
                record_prometheus("publish_failed", 1);
                tracing::warn!(
                    job_id = job.id,
                    index = job.number,
                    error = %e,
                    "Publish failed; job stays pending"
                );
                break;
            }
        }
    }

    if published.is_empty() {
        return 0;
    }

    match ledger.mark_dispatched(&published).await {
        Ok(marked) => {
            metrics.jobs_relayed.fetch_add(marked, Ordering::Relaxed);
            record_prometheus("relayed", marked);
            tracing::debug!(relayed = marked, pending = jobs.len(), "Outbox relay cycle");
            marked
        }
        Err(e) => {
            // Already published; the next cycle publishes these again.
            metrics.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, jobs = published.len(), "Failed to mark jobs dispatched");
            0
        }
    }
}

fn record_prometheus(event: &str, count: u64) {
    if let Some(metrics) = metrics() {
        metrics.record_relay(event, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibwork_test_utils::fixtures::index;
    use fibwork_test_utils::{FailingLedger, MemoryLedger, RecordingEventChannel};

    #[test]
    fn test_default_config() {
        let config = OutboxRelayConfig::default();
        assert_eq!(config.interval, Duration::from_millis(500));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_relay_publishes_and_marks_dispatched() {
        let ledger = MemoryLedger::new();
        let channel = RecordingEventChannel::new();
        let metrics = OutboxRelayMetrics::new();

        ledger.insert_with_job(index(3)).await.unwrap();
        ledger.insert_with_job(index(5)).await.unwrap();

        let relayed = relay_once(&ledger, &channel, "insert", 100, &metrics).await;
        assert_eq!(relayed, 2);
        assert_eq!(
            channel.published(),
            vec![
                ("insert".to_string(), "3".to_string()),
                ("insert".to_string(), "5".to_string())
            ]
        );
        assert!(ledger.pending_jobs(100).await.unwrap().is_empty());

        // Nothing left to do on the next cycle.
        assert_eq!(relay_once(&ledger, &channel, "insert", 100, &metrics).await, 0);
        assert_eq!(channel.published().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_publish_stays_pending() {
        let ledger = MemoryLedger::new();
        let channel = RecordingEventChannel::new();
        let metrics = OutboxRelayMetrics::new();

        ledger.insert_with_job(index(8)).await.unwrap();
        channel.fail_next(1);

        assert_eq!(relay_once(&ledger, &channel, "insert", 100, &metrics).await, 0);
        let pending = ledger.pending_jobs(100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].number, 8);
        assert_eq!(metrics.snapshot().publish_failures, 1);

        assert_eq!(relay_once(&ledger, &channel, "insert", 100, &metrics).await, 1);
        assert!(ledger.pending_jobs(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_the_batch() {
        let ledger = MemoryLedger::new();
        let channel = RecordingEventChannel::new();
        let metrics = OutboxRelayMetrics::new();

        for n in [1, 2, 3] {
            ledger.insert_with_job(index(n)).await.unwrap();
        }
        // Let the first publish through, fail the second.
        relay_once(&ledger, &channel, "insert", 1, &metrics).await;
        channel.fail_next(1);
        relay_once(&ledger, &channel, "insert", 100, &metrics).await;

        let pending: Vec<u32> = ledger
            .pending_jobs(100)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.number)
            .collect();
        assert_eq!(pending, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_store_failure_is_counted() {
        let ledger = FailingLedger::default();
        let channel = RecordingEventChannel::new();
        let metrics = OutboxRelayMetrics::new();

        assert_eq!(relay_once(&ledger, &channel, "insert", 100, &metrics).await, 0);
        assert_eq!(metrics.snapshot().store_errors, 1);
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let channel: Arc<dyn EventChannel> = Arc::new(RecordingEventChannel::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let config = OutboxRelayConfig {
            interval: Duration::from_millis(10),
            batch_size: 10,
        };
        let handle = tokio::spawn(outbox_relay_task(
            ledger,
            channel,
            "insert".to_string(),
            config,
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();
        assert!(metrics.snapshot().cycles >= 1);
    }
}
