use std::future::Future;
use std::io;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::analysis::AnalysisBridge;
use crate::messaging::ConsumerHandle;

#[derive(Clone)]
pub struct ApiState {
    pub consumer: ConsumerHandle,
    pub bridge: AnalysisBridge,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    consumer: &'static str,
}

/// `GET /v1/health`: process liveness plus the consumer loop state.
async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        consumer: state.consumer.state().as_str(),
    })
}

/// `GET /v1/health/ai`: proxies the analysis backend's own health probe.
async fn ai_health(State(state): State<ApiState>) -> Response {
    match state.bridge.health().await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "analysis backend health check failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"status": "unavailable", "error": e.to_string()})),
            )
                .into_response()
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/health/ai", get(ai_health))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    tracing::info!("🌐 health API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "health API failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::serve as serve_app;
    use crate::config::BrokerSettings;
    use crate::messaging::{Backoff, Dispatcher, JobConsumer, MockResultSink, RabbitConnection};
    use crate::metrics::Metrics;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn consumer() -> JobConsumer {
        let dispatcher = Dispatcher::new(None, Arc::new(MockResultSink::new()), Arc::new(Metrics::new()));
        JobConsumer::new(
            RabbitConnection::new(BrokerSettings::default(), "consumer"),
            "ai.jobs",
            dispatcher,
            Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
        )
    }

    async fn get_json(url: String) -> (u16, Value) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn health_reports_consumer_state() {
        let consumer = consumer();
        let state = ApiState {
            consumer: consumer.handle(),
            bridge: AnalysisBridge::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap(),
        };
        let base = serve_app(router(state)).await;

        let (status, body) = get_json(format!("{base}/v1/health")).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"status": "ok", "consumer": "stopped"}));
    }

    #[tokio::test]
    async fn ai_health_proxies_backend() {
        let backend = serve_app(Router::new().route(
            "/health",
            get(|| async { Json(json!({"status": "ok", "model": "loaded"})) }),
        ))
        .await;

        let consumer = consumer();
        let state = ApiState {
            consumer: consumer.handle(),
            bridge: AnalysisBridge::new(backend, Duration::from_secs(5)).unwrap(),
        };
        let base = serve_app(router(state)).await;

        let (status, body) = get_json(format!("{base}/v1/health/ai")).await;
        assert_eq!(status, 200);
        assert_eq!(body["model"], "loaded");
    }

    #[tokio::test]
    async fn ai_health_unreachable_is_bad_gateway() {
        let consumer = consumer();
        let state = ApiState {
            consumer: consumer.handle(),
            bridge: AnalysisBridge::new("http://127.0.0.1:1", Duration::from_secs(5)).unwrap(),
        };
        let base = serve_app(router(state)).await;

        let (status, body) = get_json(format!("{base}/v1/health/ai")).await;
        assert_eq!(status, 502);
        assert_eq!(body["status"], "unavailable");
        assert!(body["error"].as_str().is_some());
    }
}
