//! fibwork API Server Entry Point
//!
//! Bootstraps configuration, opens the three stores, starts the background
//! jobs the configuration asks for, and serves the Axum router until a
//! termination signal.

use std::net::SocketAddr;
use std::sync::Arc;

use fibwork_api::jobs::{outbox_relay_task, spawn_embedded_worker, OutboxRelayConfig};
use fibwork_api::telemetry::{init_tracer, TelemetryConfig};
use fibwork_api::{create_router, ApiConfig, ApiError, ApiResult, AppState, DispatchMode};
use fibwork_storage::StorageConfig;
use fibwork_worker::{wait_for_shutdown, WorkerError};
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    let storage = StorageConfig::from_env()?;
    api_config.check_storage(&storage)?;

    // Any store that cannot be reached now is fatal.
    let cache = storage.open_cache().await.map_err(ApiError::from_cache)?;
    let ledger = storage.open_ledger().await.map_err(ApiError::from_ledger)?;
    let channel = storage.open_channel().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker = if api_config.embedded_worker {
        Some(
            spawn_embedded_worker(
                Arc::clone(&cache),
                Arc::clone(&channel),
                api_config.embedded_worker_config()?,
                shutdown_rx.clone(),
            )
            .await?,
        )
    } else {
        None
    };

    let relay = match api_config.dispatch_mode {
        DispatchMode::Outbox => Some(tokio::spawn(outbox_relay_task(
            Arc::clone(&ledger),
            Arc::clone(&channel),
            api_config.topic.clone(),
            OutboxRelayConfig::from_env(),
            shutdown_rx.clone(),
        ))),
        DispatchMode::Direct => None,
    };

    let grace = api_config.shutdown_grace;
    let state = AppState::new(
        Arc::clone(&cache),
        Arc::clone(&ledger),
        Arc::clone(&channel),
        api_config,
    );
    let app = create_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting fibwork API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let mut drain_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = drain_rx.wait_for(|stop| *stop).await;
    });
    let mut server = tokio::spawn(async move { server.await });

    // Stop on a signal, on server failure, or when the embedded worker dies.
    let mut outcome: ApiResult<()> = Ok(());
    let mut worker_exited = false;
    tokio::select! {
        signal = wait_for_shutdown() => {
            match signal {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Signal handling failed; shutting down"),
            }
        }
        joined = &mut server => {
            outcome = server_outcome(joined);
        }
        failure = worker_failure(&mut worker) => {
            tracing::error!(error = %failure, "Embedded worker stopped; shutting down");
            worker_exited = true;
            outcome = Err(failure.into());
        }
    }

    let _ = shutdown_tx.send(true);
    let deadline = Instant::now() + grace;

    if !server.is_finished() {
        match timeout_at(deadline, &mut server).await {
            Ok(joined) => {
                if let Err(e) = server_outcome(joined) {
                    outcome = outcome.and(Err(e));
                }
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "Drain deadline passed; dropping open connections"
                );
                server.abort();
            }
        }
    }

    if let Some(mut relay) = relay {
        match timeout_at(deadline, &mut relay).await {
            Ok(Ok(metrics)) => {
                let snapshot = metrics.snapshot();
                tracing::info!(jobs_relayed = snapshot.jobs_relayed, "Outbox relay stopped");
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Outbox relay task panicked"),
            Err(_) => relay.abort(),
        }
    }

    if let Some(mut worker) = worker.filter(|_| !worker_exited) {
        match timeout_at(deadline, &mut worker.run).await {
            Ok(Ok(Ok(snapshot))) => {
                tracing::info!(computed = snapshot.computed, "Embedded worker stopped")
            }
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "Embedded worker stopped with an error"),
            Ok(Err(e)) => tracing::error!(error = %e, "Embedded worker task panicked"),
            Err(_) => {
                tracing::warn!("Drain deadline passed; abandoning in-flight jobs");
                worker.run.abort();
            }
        }
        let _ = timeout_at(deadline, worker.exporter).await;
    }

    ledger.close();
    cache.close();
    channel.close();
    tracing::info!("Shutdown complete");

    outcome
}

fn server_outcome(joined: Result<std::io::Result<()>, tokio::task::JoinError>) -> ApiResult<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ApiError::internal_error(format!("Server error: {}", e))),
        Err(e) => Err(ApiError::internal_error(format!("Server task failed: {}", e))),
    }
}

/// Resolves when the embedded worker exits on its own. Pending forever when
/// there is no embedded worker.
async fn worker_failure(worker: &mut Option<fibwork_api::jobs::EmbeddedWorker>) -> WorkerError {
    let Some(worker) = worker.as_mut() else {
        return std::future::pending().await;
    };
    match (&mut worker.run).await {
        Ok(Err(e)) => e,
        Ok(Ok(_)) => WorkerError::DispatcherStopped,
        Err(e) => {
            tracing::error!(error = %e, "Embedded worker task panicked");
            WorkerError::DispatcherStopped
        }
    }
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("FIBWORK_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("FIBWORK_API_PORT").ok())
        .unwrap_or_else(|| "5000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
