use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::analysis::{AnalysisBridge, AnalysisOrchestrator, BridgeError};
use crate::api::{self, ApiState};
use crate::config::{Config, ConfigError};
use crate::messaging::{
    Backoff, Dispatcher, JobConsumer, JobHandler, QueueRoutes, RabbitConnection, ResultPublisher,
    ResultSink,
};
use crate::metrics::Metrics;
use crate::shutdown;

/// How long the consumer loop may take to notice a stop request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

// ── Error type ─────────────────────────────────────────────────────────────────

/// Top-level application error, surfaced only at startup and shutdown.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("analysis client setup failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("cannot bind health API on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot install signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// ── Entry point ────────────────────────────────────────────────────────────────

/// Full application lifecycle.
///
/// # Startup sequence
/// 1. Load and validate configuration from environment variables.
/// 2. Connect the result publisher (its own connection, confirms on).
/// 3. Wire consumer → orchestrator → bridge → publisher.
/// 4. Start the consumer loop and the health API.
/// 5. Run until SIGINT / SIGTERM, then stop consuming and close the broker
///    links. Jobs already dispatched are not awaited.
pub async fn run() -> Result<(), AppError> {
    // ── 1. Configuration ──────────────────────────────────────────────────────
    let cfg = Config::load()?;
    cfg.log_summary();

    let metrics = Arc::new(Metrics::new());

    // ── 2. Publisher ──────────────────────────────────────────────────────────
    let publisher = Arc::new(ResultPublisher::new(
        RabbitConnection::new(cfg.broker.clone(), "publisher").with_publisher_confirms(),
        QueueRoutes::new(cfg.result_queues.clone()),
        Arc::clone(&metrics),
    ));
    if let Err(e) = publisher.connect().await {
        // Every publish reconnects on demand.
        tracing::warn!(error = %e, "⚠️  publisher not connected at startup");
    }
    let results: Arc<dyn ResultSink> = publisher.clone();

    // ── 3. Job path ───────────────────────────────────────────────────────────
    let bridge = AnalysisBridge::new(cfg.ai_base_url.clone(), cfg.ai_timeout)?;
    let handler: Arc<dyn JobHandler> = Arc::new(AnalysisOrchestrator::new(
        bridge.clone(),
        Arc::clone(&results),
        Arc::clone(&metrics),
    ));
    let dispatcher = Dispatcher::new(Some(handler), results, Arc::clone(&metrics));

    // ── 4. Consumer + API ─────────────────────────────────────────────────────
    let consumer = JobConsumer::new(
        RabbitConnection::new(cfg.broker.clone(), "consumer"),
        cfg.job_queue.clone(),
        dispatcher,
        Backoff::new(cfg.reconnect_initial_delay, cfg.reconnect_max_delay),
    );
    let consumer_handle = consumer.handle();
    let consumer_task = tokio::spawn(consumer.run());

    let addr = cfg.api_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| AppError::Bind { addr, source })?;
    let (shutdown_handle, shutdown_signal) = shutdown::new_pair();
    let api_state = ApiState {
        consumer: consumer_handle.clone(),
        bridge,
    };
    let api_task = tokio::spawn(api::serve(listener, api_state, shutdown_signal.wait()));

    tracing::info!(queue = %cfg.job_queue, "✅ ai-gateway ready, waiting for analysis jobs");

    // ── 5. Shutdown ───────────────────────────────────────────────────────────
    shutdown::wait_for_os_signal().await.map_err(AppError::Signal)?;
    tracing::info!("🛑 signal received, initiating graceful shutdown...");

    consumer_handle.stop();
    shutdown_handle.trigger();

    match tokio::time::timeout(SHUTDOWN_GRACE, consumer_task).await {
        Ok(joined) => joined?,
        Err(_) => tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "consumer did not stop in time, abandoning it"
        ),
    }

    if let Err(e) = api_task.await? {
        tracing::warn!(error = %e, "health API exited with an error");
    }

    publisher.close().await;
    metrics.log_summary();
    tracing::info!("✅ shutdown complete");
    Ok(())
}
