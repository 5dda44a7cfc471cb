//! Worker error types.

use fibwork_core::{ChannelError, ConfigError, StoreError};
use thiserror::Error;

/// Errors that stop the worker. Per-message problems never surface here.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatcher stopped unexpectedly")]
    DispatcherStopped,

    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
