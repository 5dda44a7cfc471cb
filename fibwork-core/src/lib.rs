//! fibwork Core - Shared Types
//!
//! Data types used by every other crate in the workspace: the requested
//! index and its policy, ledger and outbox records, the Fibonacci function
//! computed by the worker, and the error taxonomy.

mod entities;
mod error;
mod fib;
mod index;

pub use entities::{LedgerEntry, OutboxJob, ResultMap, Timestamp, PLACEHOLDER};
pub use error::{ChannelError, ConfigError, FibError, StoreError};
pub use fib::fib;
pub use index::{Index, IndexPolicy, DEFAULT_MAX_INDEX, MAX_REPRESENTABLE_INDEX};

/// Default Event Channel topic shared by the gateway and the worker.
pub const DEFAULT_TOPIC: &str = "insert";
