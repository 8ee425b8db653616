use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::metrics::Metrics;
use crate::model::{ResultCategory, ResultMessage};

use super::connection::{BrokerLink, ConnectionError, RabbitConnection};
use super::routes::QueueRoutes;

// ── Error ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("not connected to the broker")]
    NotConnected,

    #[error("broker connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish to '{queue}' failed: {source}")]
    Broker {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("broker rejected publish to '{queue}'")]
    Nacked { queue: String },

    #[error("publish to '{queue}' blocked for more than {}s", .timeout.as_secs())]
    Blocked { queue: String, timeout: Duration },
}

// ── Sink abstraction ───────────────────────────────────────────────────────────

/// Where job results go. Implemented by [`ResultPublisher`]; the consumer and
/// the orchestrator only see this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, category: ResultCategory, payload: Value) -> Result<(), PublishError>;
}

/// Serialize `message` and hand it to `sink` under `category`.
pub async fn publish_result(
    sink: &dyn ResultSink,
    category: ResultCategory,
    message: &ResultMessage,
) -> Result<(), PublishError> {
    let payload = serde_json::to_value(message)?;
    sink.publish(category, payload).await
}

// ── ResultPublisher ────────────────────────────────────────────────────────────

struct LinkState<L> {
    link: L,
    /// Cleared before a forced reconnect so a failed reconnect is not mistaken
    /// for a live link by the next caller.
    connected: bool,
}

impl<L: BrokerLink> LinkState<L> {
    async fn ensure_connected(&mut self) -> Result<(), ConnectionError> {
        if self.connected && self.link.is_open() {
            return Ok(());
        }
        self.link.connect().await?;
        self.connected = true;
        Ok(())
    }
}

/// Publishes one message per result to the queue of its category.
///
/// # Sharing
/// One instance is wrapped in an `Arc` and shared by the consumer and every
/// job task. The link sits behind a tokio `Mutex`: publishes are serialized,
/// and a reconnect triggered by one caller is visible to the next.
///
/// # Failure policy
/// A failed publish is retried exactly once, after the link is force-closed
/// and reopened. A second failure is returned to the caller. Nothing loops,
/// because callers invoke this inline while processing a job.
pub struct ResultPublisher<L = RabbitConnection> {
    state: Mutex<LinkState<L>>,
    routes: QueueRoutes,
    metrics: Arc<Metrics>,
}

impl<L: BrokerLink> ResultPublisher<L> {
    pub fn new(link: L, routes: QueueRoutes, metrics: Arc<Metrics>) -> Self {
        Self {
            state: Mutex::new(LinkState {
                link,
                connected: false,
            }),
            routes,
            metrics,
        }
    }

    /// Open the link unless it is already open.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.ensure_connected().await?;
        tracing::info!("[Publisher] connected and ready");
        Ok(())
    }

    /// Release the link. Safe to call when never connected.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.connected || state.link.is_open() {
            state.link.close().await;
        }
        state.connected = false;
    }

    /// Publish `payload` to the queue mapped from `category`.
    ///
    /// A top-level `type` key is stripped first; the destination queue already
    /// encodes it.
    pub async fn publish(&self, category: &ResultCategory, payload: Value) -> Result<(), PublishError> {
        let queue = self.routes.resolve(category);
        let body = encode_payload(payload)?;

        let mut state = self.state.lock().await;
        state.ensure_connected().await?;

        let first = match state.link.publish(&queue, &body).await {
            Ok(()) => {
                self.metrics.inc_published();
                tracing::info!(queue = %queue, category = %category, "📤 result published");
                return Ok(());
            }
            Err(e) => e,
        };

        tracing::warn!(
            queue = %queue,
            error = %first,
            "⚠️  publish failed, reconnecting for one retry"
        );
        state.connected = false;
        state.link.close().await;

        let retried = match state.ensure_connected().await {
            Ok(()) => state.link.publish(&queue, &body).await,
            Err(e) => Err(PublishError::from(e)),
        };

        match retried {
            Ok(()) => {
                self.metrics.inc_published();
                tracing::info!(queue = %queue, category = %category, "📤 result published after reconnect");
                Ok(())
            }
            Err(e) => {
                self.metrics.inc_publish_failed();
                tracing::error!(queue = %queue, error = %e, "❌ publish failed after reconnect");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<L: BrokerLink> ResultSink for ResultPublisher<L> {
    async fn publish(&self, category: ResultCategory, payload: Value) -> Result<(), PublishError> {
        ResultPublisher::publish(self, &category, payload).await
    }
}

fn encode_payload(payload: Value) -> Result<Vec<u8>, serde_json::Error> {
    let payload = match payload {
        Value::Object(mut map) => {
            map.remove("type");
            Value::Object(map)
        }
        other => other,
    };
    serde_json::to_vec(&payload)
}
