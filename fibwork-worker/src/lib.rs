//! fibwork Worker - Compute Worker
//!
//! Subscribes to the Event Channel, computes the Fibonacci value for every
//! index it receives, and writes the result to the Result Cache. Runs as the
//! `fibwork-worker` binary or embedded in the gateway process.

pub mod config;
pub mod error;
pub mod shutdown;
pub mod worker;

pub use config::{OverflowPolicy, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use shutdown::wait_for_shutdown;
pub use worker::{parse_message, MessageOutcome, Worker, WorkerMetrics, WorkerSnapshot};
