use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::BrokerSettings;

use super::publisher::PublishError;

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// Persistent delivery mode for every outbound message.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

// ── Error ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Broker unreachable or credentials rejected on every attempt.
    #[error("broker {addr} unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        addr: String,
        attempts: u32,
        reason: String,
    },
    /// TCP/AMQP handshake succeeded but the channel could not be set up.
    #[error("channel setup failed: {0}")]
    Channel(#[source] lapin::Error),
}

// ── Owner mailbox ──────────────────────────────────────────────────────────────

/// Control operation that must run on the task owning the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerRequest {
    /// Cancel the active consumer and end the current consume cycle.
    StopConsuming,
}

/// Cloneable handle for submitting [`OwnerRequest`]s from other tasks.
///
/// Requests are queued and executed by the owner when it next polls
/// [`RabbitConnection::next_owner_request`]. The channel itself never leaves
/// the owner.
#[derive(Debug, Clone)]
pub struct OwnerHandle {
    tx: mpsc::UnboundedSender<OwnerRequest>,
}

impl OwnerHandle {
    /// Queue `request` for the owner. Returns `false` once the owner is gone.
    pub fn submit(&self, request: OwnerRequest) -> bool {
        self.tx.send(request).is_ok()
    }
}

// ── Link abstraction ───────────────────────────────────────────────────────────

/// The subset of connection behaviour the result publisher relies on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerLink: Send {
    async fn connect(&mut self) -> Result<(), ConnectionError>;
    async fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Publish `body` to `queue` through the default exchange.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), PublishError>;
}

// ── RabbitConnection ───────────────────────────────────────────────────────────

struct ConnectionState {
    connection: Connection,
    channel: Channel,
}

/// One AMQP connection plus one channel, exclusively owned.
///
/// The handles are rebuilt on every [`connect`](Self::connect); nothing else
/// in the process shares them. The consumer and the publisher each own a
/// separate `RabbitConnection`.
pub struct RabbitConnection {
    settings: BrokerSettings,
    /// Log label: which component owns this connection.
    role: &'static str,
    confirms: bool,
    state: Option<ConnectionState>,
    owner_tx: mpsc::UnboundedSender<OwnerRequest>,
    owner_rx: mpsc::UnboundedReceiver<OwnerRequest>,
}

impl RabbitConnection {
    pub fn new(settings: BrokerSettings, role: &'static str) -> Self {
        let (owner_tx, owner_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            role,
            confirms: false,
            state: None,
            owner_tx,
            owner_rx,
        }
    }

    /// Put the channel in confirm mode on every connect so publishes wait for
    /// the broker's ack.
    pub fn with_publisher_confirms(mut self) -> Self {
        self.confirms = true;
        self
    }

    /// Open a fresh connection and channel, replacing any previous state.
    ///
    /// Makes up to `connection_attempts` attempts, each bounded by
    /// `socket_timeout`, sleeping `retry_delay` in between. These are transport
    /// parameters; reconnect policy belongs to the caller.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.close().await;

        let attempts = self.settings.connection_attempts.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let handshake = Connection::connect_uri(self.uri(), ConnectionProperties::default());

            match tokio::time::timeout(self.settings.socket_timeout, handshake).await {
                Ok(Ok(connection)) => {
                    let channel = match self.open_channel(&connection).await {
                        Ok(channel) => channel,
                        Err(e) => {
                            let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                            return Err(e);
                        }
                    };
                    self.state = Some(ConnectionState { connection, channel });
                    tracing::info!(
                        role = self.role,
                        broker = %self.settings.addr(),
                        "📡 RabbitMQ connected"
                    );
                    return Ok(());
                }
                Ok(Err(e)) => reason = e.to_string(),
                Err(_) => {
                    reason = format!("handshake timed out after {}s", self.settings.socket_timeout.as_secs())
                }
            }

            if attempt < attempts {
                tracing::warn!(
                    role = self.role,
                    attempt,
                    max = attempts,
                    error = %reason,
                    "⚠️  RabbitMQ not ready, retrying in {}s...",
                    self.settings.retry_delay.as_secs()
                );
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        Err(ConnectionError::Unreachable {
            addr: self.settings.addr(),
            attempts,
            reason,
        })
    }

    /// Close channel and connection if open. Idempotent.
    ///
    /// State is dropped before the close handshakes run, so a failing close
    /// still leaves the manager unconnected.
    pub async fn close(&mut self) {
        let Some(ConnectionState { connection, channel }) = self.state.take() else {
            return;
        };

        if channel.status().connected() {
            if let Err(e) = channel.close(REPLY_SUCCESS, "closing").await {
                tracing::debug!(role = self.role, error = %e, "channel close failed");
            }
        }
        if connection.status().connected() {
            if let Err(e) = connection.close(REPLY_SUCCESS, "closing").await {
                tracing::debug!(role = self.role, error = %e, "connection close failed");
            }
        }

        tracing::info!(role = self.role, "🔌 RabbitMQ connection closed");
    }

    pub fn is_open(&self) -> bool {
        self.state.as_ref().is_some_and(|s| {
            s.connection.status().connected() && s.channel.status().connected()
        })
    }

    /// The open channel, or `None` before `connect` / after `close`.
    pub fn channel(&self) -> Option<&Channel> {
        self.state.as_ref().map(|s| &s.channel)
    }

    pub fn owner_handle(&self) -> OwnerHandle {
        OwnerHandle {
            tx: self.owner_tx.clone(),
        }
    }

    /// Wait for the next request submitted through an [`OwnerHandle`].
    ///
    /// Only the owning task calls this, which is what keeps channel operations
    /// on a single task.
    pub async fn next_owner_request(&mut self) -> Option<OwnerRequest> {
        self.owner_rx.recv().await
    }

    async fn open_channel(&self, connection: &Connection) -> Result<Channel, ConnectionError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(ConnectionError::Channel)?;

        if self.confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(ConnectionError::Channel)?;
        }

        Ok(channel)
    }

    fn uri(&self) -> AMQPUri {
        let s = &self.settings;
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: s.username.clone(),
                    password: s.password.clone(),
                },
                host: s.host.clone(),
                port: s.port,
            },
            vhost: s.vhost.clone(),
            query: AMQPQueryString {
                heartbeat: Some(s.heartbeat.as_secs().min(u64::from(u16::MAX)) as u16),
                connection_timeout: Some(s.socket_timeout.as_millis() as u64),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl BrokerLink for RabbitConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        RabbitConnection::connect(self).await
    }

    async fn close(&mut self) {
        RabbitConnection::close(self).await
    }

    fn is_open(&self) -> bool {
        RabbitConnection::is_open(self)
    }

    /// Persistent, `application/json`. The publish and its confirm together
    /// are bounded by `blocked_connection_timeout`.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), PublishError> {
        let channel = self.channel().ok_or(PublishError::NotConnected)?;

        let props = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let send = async {
            let confirm = channel
                .basic_publish("", queue, BasicPublishOptions::default(), body, props)
                .await?;
            confirm.await
        };

        let limit = self.settings.blocked_connection_timeout;
        match tokio::time::timeout(limit, send).await {
            Err(_) => Err(PublishError::Blocked {
                queue: queue.to_string(),
                timeout: limit,
            }),
            Ok(Err(source)) => Err(PublishError::Broker {
                queue: queue.to_string(),
                source,
            }),
            Ok(Ok(confirmation)) if confirmation.is_nack() => Err(PublishError::Nacked {
                queue: queue.to_string(),
            }),
            Ok(Ok(_)) => Ok(()),
        }
    }
}
