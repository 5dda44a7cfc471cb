//! Event channel over PostgreSQL LISTEN/NOTIFY.
//!
//! Publishing goes through the pool with `pg_notify`. Each subscription owns
//! a dedicated connection, since LISTEN state is per session and a pooled
//! connection could be recycled under it. A lost listener connection is
//! re-established up to [`ChannelReconnectPolicy::max_reconnects`]
//! consecutive times; after that the subscription yields
//! [`ChannelError::ReconnectsExhausted`] and ends.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use fibwork_core::{ChannelError, StoreError};
use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::DbConfig;
use crate::traits::{EventChannel, Subscription};

/// Buffer between the listener task and the subscriber.
const SUBSCRIPTION_BUFFER: usize = 256;

/// How hard a subscription tries to get its listener connection back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelReconnectPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnects: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for ChannelReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: 5,
            delay: Duration::from_millis(1000),
        }
    }
}

impl ChannelReconnectPolicy {
    /// Read `FIBWORK_CHANNEL_MAX_RECONNECTS` and
    /// `FIBWORK_CHANNEL_RECONNECT_DELAY_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_reconnects: std::env::var("FIBWORK_CHANNEL_MAX_RECONNECTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_reconnects),
            delay: std::env::var("FIBWORK_CHANNEL_RECONNECT_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay),
        }
    }
}

/// LISTEN/NOTIFY event channel.
#[derive(Clone)]
pub struct PgEventChannel {
    pool: Pool,
    config: DbConfig,
    policy: ChannelReconnectPolicy,
}

impl PgEventChannel {
    pub fn new(pool: Pool, config: DbConfig, policy: ChannelReconnectPolicy) -> Self {
        Self {
            pool,
            config,
            policy,
        }
    }

    pub fn from_config(
        config: &DbConfig,
        policy: ChannelReconnectPolicy,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(config.create_pool()?, config.clone(), policy))
    }
}

#[async_trait]
impl EventChannel for PgEventChannel {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), ChannelError> {
        let publish_failed = |reason: String| ChannelError::PublishFailed {
            topic: topic.to_string(),
            reason,
        };
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| publish_failed(e.to_string()))?;
        conn.execute("SELECT pg_notify($1, $2)", &[&topic, &message])
            .await
            .map_err(|e| publish_failed(e.to_string()))?;
        debug!(topic, "Published notification");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, ChannelError> {
        let session = ListenSession::open(&self.config, topic)
            .await
            .map_err(|e| ChannelError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        info!(topic, "Listening for notifications");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(run_listener(
            self.config.clone(),
            topic.to_string(),
            self.policy,
            Some(session),
            tx,
        ));
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn ping(&self) -> Result<(), ChannelError> {
        let unavailable = |reason: String| ChannelError::Unavailable { reason };
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        conn.execute("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(|e| unavailable(e.to_string()))
    }

    fn close(&self) {
        self.pool.close();
    }
}

// ============================================================================
// LISTENER TASK
// ============================================================================

/// One live LISTEN connection.
struct ListenSession {
    // Dropping the client closes the connection.
    _client: Client,
    notifications: mpsc::UnboundedReceiver<String>,
    driver: JoinHandle<Result<(), tokio_postgres::Error>>,
}

enum SessionEnd {
    SubscriberGone,
    ConnectionLost(String),
}

impl ListenSession {
    async fn open(config: &DbConfig, topic: &str) -> Result<Self, tokio_postgres::Error> {
        let (client, mut connection) = config.pg_config().connect(NoTls).await?;
        let (note_tx, notifications) = mpsc::unbounded_channel();

        // The connection must be polled for LISTEN to complete and for
        // notifications to arrive.
        let driver = tokio::spawn(async move {
            let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message? {
                    AsyncMessage::Notification(note) => {
                        if note_tx.send(note.payload().to_string()).is_err() {
                            break;
                        }
                    }
                    AsyncMessage::Notice(notice) => debug!("Server notice: {}", notice),
                    _ => {}
                }
            }
            Ok(())
        });

        client
            .batch_execute(&format!("LISTEN {}", quote_ident(topic)))
            .await?;

        Ok(Self {
            _client: client,
            notifications,
            driver,
        })
    }

    async fn forward(mut self, tx: &mpsc::Sender<Result<String, ChannelError>>) -> SessionEnd {
        loop {
            tokio::select! {
                note = self.notifications.recv() => match note {
                    Some(payload) => {
                        if tx.send(Ok(payload)).await.is_err() {
                            return SessionEnd::SubscriberGone;
                        }
                    }
                    None => break,
                },
                _ = tx.closed() => return SessionEnd::SubscriberGone,
            }
        }

        let reason = match self.driver.await {
            Ok(Ok(())) => "connection closed".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        SessionEnd::ConnectionLost(reason)
    }
}

/// Forward notifications from `first`, then keep reconnecting until the
/// subscriber leaves or `policy` runs out. With no `first` session the
/// task starts in the reconnect loop.
async fn run_listener(
    config: DbConfig,
    topic: String,
    policy: ChannelReconnectPolicy,
    first: Option<ListenSession>,
    tx: mpsc::Sender<Result<String, ChannelError>>,
) {
    let mut session = first;
    let mut failures: u32 = 0;

    loop {
        if let Some(live) = session.take() {
            failures = 0;
            match live.forward(&tx).await {
                SessionEnd::SubscriberGone => {
                    debug!(topic = %topic, "Subscriber dropped; closing listener");
                    return;
                }
                SessionEnd::ConnectionLost(reason) => {
                    warn!(topic = %topic, reason = %reason, "Listener connection lost");
                }
            }
        }

        if failures >= policy.max_reconnects {
            warn!(topic = %topic, attempts = failures, "Giving up on listener connection");
            let _ = tx
                .send(Err(ChannelError::ReconnectsExhausted { attempts: failures }))
                .await;
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = tx.closed() => return,
        }

        failures += 1;
        match ListenSession::open(&config, &topic).await {
            Ok(reopened) => {
                info!(topic = %topic, attempt = failures, "Listener reconnected");
                session = Some(reopened);
            }
            Err(e) => {
                warn!(topic = %topic, attempt = failures, error = %e, "Listener reconnect failed");
            }
        }
    }
}

/// Quote a channel name as a SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("insert"), "\"insert\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_default_policy() {
        let policy = ChannelReconnectPolicy::default();
        assert_eq!(policy.max_reconnects, 5);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_listener_gives_up_after_max_reconnects() {
        let config = DbConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout: Duration::from_secs(1),
            ..DbConfig::default()
        };
        let policy = ChannelReconnectPolicy {
            max_reconnects: 2,
            delay: Duration::from_millis(1),
        };
        let (tx, rx) = mpsc::channel(4);
        let listener = tokio::spawn(run_listener(config, "insert".to_string(), policy, None, tx));
        let mut stream = ReceiverStream::new(rx);

        let first = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .unwrap();
        assert_eq!(
            first,
            Some(Err(ChannelError::ReconnectsExhausted { attempts: 2 }))
        );
        assert_eq!(stream.next().await, None);
        listener.await.unwrap();
    }
}
