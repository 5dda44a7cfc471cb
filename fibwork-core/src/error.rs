//! Error types for fibwork operations

use std::time::Duration;
use thiserror::Error;

/// Errors raised while computing a Fibonacci value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FibError {
    #[error("Index {index} is outside the accepted range 0..={max}")]
    OutOfRange { index: i64, max: u32 },

    #[error("Fibonacci value for index {index} does not fit in 64 bits")]
    Overflow { index: u32 },
}

/// Result Cache and Ledger errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Connection pool exhausted after {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("Query failed on {store}: {reason}")]
    QueryFailed { store: &'static str, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Corrupt record in {store}: {reason}")]
    Corrupt { store: &'static str, reason: String },
}

/// Event Channel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Publish to topic '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Subscribe to topic '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("Channel unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Channel permanently down after {attempts} reconnect attempts")]
    ReconnectsExhausted { attempts: u32 },

    #[error("Channel closed")]
    Closed,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}
