//! fibwork Worker Entry Point
//!
//! Opens the Result Cache and Event Channel named by the environment and
//! runs the compute loop until a termination signal or a permanent channel
//! failure.

use fibwork_core::ConfigError;
use fibwork_storage::{ChannelBackend, StorageConfig};
use fibwork_worker::{wait_for_shutdown, Worker, WorkerConfig, WorkerError, WorkerResult};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> WorkerResult<()> {
    init_tracing()?;

    let config = WorkerConfig::from_env()?;
    let storage = StorageConfig::from_env()?;
    if storage.channel == ChannelBackend::Memory {
        return Err(ConfigError::IncompatibleOptions {
            option_a: "FIBWORK_CHANNEL_BACKEND=memory".to_string(),
            option_b: "standalone fibwork-worker".to_string(),
        }
        .into());
    }

    let cache = storage.open_cache().await?;
    let channel = storage.open_channel().await?;
    let grace = config.shutdown_grace;

    let worker = Worker::new(cache.clone(), channel.clone(), config);
    let subscription = worker.subscribe().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run = tokio::spawn(worker.run_with(subscription, shutdown_rx));

    let result = tokio::select! {
        joined = &mut run => joined,
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Signal handling failed; shutting down");
            }
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(grace, &mut run).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        grace_secs = grace.as_secs(),
                        "Drain deadline passed; abandoning in-flight jobs"
                    );
                    run.abort();
                    cache.close();
                    channel.close();
                    return Ok(());
                }
            }
        }
    };

    cache.close();
    channel.close();

    match result {
        Ok(Ok(snapshot)) => {
            tracing::info!(computed = snapshot.computed, "Worker exited cleanly");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Worker stopped with an error");
            Err(e)
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker task panicked");
            Err(WorkerError::DispatcherStopped)
        }
    }
}

fn init_tracing() -> WorkerResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fibwork_worker=debug,fibwork_storage=info,info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| WorkerError::Telemetry(e.to_string()))
}
