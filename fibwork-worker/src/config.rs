//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use fibwork_core::{ConfigError, IndexPolicy, DEFAULT_MAX_INDEX, DEFAULT_TOPIC};

/// Default number of computations running at once.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Default bound on messages waiting for a free slot.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default time allowed for in-flight work on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// What to do with a message that arrives while the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the message and count it.
    Reject,
    /// Stop reading from the channel until space frees.
    #[default]
    Wait,
}

impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "wait" => Ok(Self::Wait),
            _ => Err(ConfigError::InvalidValue {
                field: "worker_overflow".to_string(),
                value: s.to_string(),
                reason: "expected reject or wait".to_string(),
            }),
        }
    }
}

/// Configuration for the compute worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Event Channel topic to consume
    pub topic: String,
    /// Accepted index range
    pub policy: IndexPolicy,
    /// Computations allowed in flight at once
    pub concurrency: usize,
    /// Messages buffered between the channel and the pool
    pub queue_capacity: usize,
    /// Behaviour when the buffer is full
    pub overflow: OverflowPolicy,
    /// Hard deadline for draining on shutdown
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            policy: IndexPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create WorkerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FIBWORK_TOPIC`: topic to consume (default: insert)
    /// - `FIBWORK_MAX_INDEX`: largest accepted index (default: 40, at most 92)
    /// - `FIBWORK_WORKER_CONCURRENCY`: computations in flight (default: 1)
    /// - `FIBWORK_WORKER_QUEUE_CAPACITY`: queued messages (default: 1024)
    /// - `FIBWORK_WORKER_OVERFLOW`: reject or wait (default: wait)
    /// - `FIBWORK_SHUTDOWN_GRACE_SECS`: drain deadline (default: 10)
    ///
    /// Unparseable numbers fall back to defaults. Values that cannot work
    /// (zero concurrency, zero capacity, an unrepresentable bound, an unknown
    /// overflow policy) are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_index = std::env::var("FIBWORK_MAX_INDEX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_INDEX);

        let overflow = match std::env::var("FIBWORK_WORKER_OVERFLOW") {
            Ok(raw) => raw.parse()?,
            Err(_) => OverflowPolicy::default(),
        };

        let config = Self {
            topic: std::env::var("FIBWORK_TOPIC")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            policy: IndexPolicy::new(max_index)?,
            concurrency: std::env::var("FIBWORK_WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONCURRENCY),
            queue_capacity: std::env::var("FIBWORK_WORKER_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            overflow,
            shutdown_grace: Duration::from_secs(
                std::env::var("FIBWORK_SHUTDOWN_GRACE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_concurrency".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_queue_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
