//! Compute worker running inside the gateway process.
//!
//! Required when the Event Channel is in-memory, and convenient for
//! single-process deployments otherwise. The worker subscribes before this
//! returns, so nothing the gateway publishes afterwards is missed.

use std::sync::Arc;
use std::time::Duration;

use fibwork_storage::{EventChannel, ResultCache};
use fibwork_worker::{Worker, WorkerConfig, WorkerMetrics, WorkerResult, WorkerSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::ApiResult;
use crate::telemetry::metrics;

/// How often worker counters are copied into Prometheus.
const EXPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Handles to a running embedded worker.
pub struct EmbeddedWorker {
    pub run: JoinHandle<WorkerResult<WorkerSnapshot>>,
    pub exporter: JoinHandle<()>,
}

/// Subscribe and start the worker loop and its metrics exporter.
pub async fn spawn_embedded_worker(
    cache: Arc<dyn ResultCache>,
    channel: Arc<dyn EventChannel>,
    config: WorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> ApiResult<EmbeddedWorker> {
    let worker = Worker::new(cache, channel, config);
    let subscription = worker.subscribe().await?;
    let worker_metrics = worker.metrics();

    let run = tokio::spawn(worker.run_with(subscription, shutdown_rx.clone()));
    let exporter = tokio::spawn(export_worker_metrics(worker_metrics, shutdown_rx));

    tracing::info!("Embedded worker started");
    Ok(EmbeddedWorker { run, exporter })
}

/// Copy worker counters into the Prometheus registry until shutdown.
async fn export_worker_metrics(source: Arc<WorkerMetrics>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut exported = WorkerSnapshot::default();
    let mut ticker = interval(EXPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                exported = export_delta(exported, source.snapshot());
            }
        }
    }
    export_delta(exported, source.snapshot());
}

/// Record the growth from `last` to `now`. Returns `now`.
fn export_delta(last: WorkerSnapshot, now: WorkerSnapshot) -> WorkerSnapshot {
    if let Some(metrics) = metrics() {
        let deltas = [
            ("computed", now.computed.saturating_sub(last.computed)),
            ("discarded", now.discarded.saturating_sub(last.discarded)),
            (
                "dropped_overflow",
                now.dropped_overflow.saturating_sub(last.dropped_overflow),
            ),
            (
                "cache_failed",
                now.cache_failures.saturating_sub(last.cache_failures),
            ),
        ];
        for (outcome, delta) in deltas {
            if delta > 0 {
                metrics.record_jobs(outcome, delta);
            }
        }
    }
    now
}
