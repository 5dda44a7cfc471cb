//! Background Jobs for the fibwork gateway
//!
//! - `outbox_relay`: publishes pending outbox jobs (outbox dispatch mode)
//! - `embedded_worker`: runs the compute worker in-process
//!
//! Both stop when `true` is sent on the shared shutdown watch channel:
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let relay = tokio::spawn(outbox_relay_task(ledger, channel, topic, config, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = relay.await?;
//! ```

pub mod embedded_worker;
pub mod outbox_relay;

pub use embedded_worker::{spawn_embedded_worker, EmbeddedWorker};
pub use outbox_relay::{
    outbox_relay_task, relay_once, OutboxRelayConfig, OutboxRelayMetrics, OutboxRelaySnapshot,
};
