//! Admin server for health, metrics and alert state.
//!
//! Runs on its own listener (default `127.0.0.1:9090`) so scrapers and
//! operators never share a port with API clients.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/health` | liveness JSON |
//! | GET | `/metrics` | OpenMetrics text |
//! | GET | `/metrics/json` | registry snapshot as JSON |
//! | GET | `/alerts` | per-rule alert status |
//! | POST | `/alerts/{name}/silence` | silence a rule, body `{"duration": "30m"}` |
//! | DELETE | `/alerts/{name}/silence` | lift a silence |

use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lexigate_core::CoreServices;
use lexigate_core::alerts::SilenceError;
use lexigate_core::config::duration_format::parse_duration;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{ServerError, ServerResult};

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub services: CoreServices,
    pub started: Instant,
}

/// Admin server bound to one address.
pub struct AdminServer {
    bind: String,
    state: AdminState,
}

impl AdminServer {
    pub fn new(services: CoreServices, bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            state: AdminState {
                services,
                started: Instant::now(),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/metrics/json", get(metrics_json_handler))
            .route("/alerts", get(alerts_handler))
            .route(
                "/alerts/{name}/silence",
                post(silence_handler).delete(unsilence_handler),
            )
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> ServerResult<()> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.bind.clone(),
                source,
            })?;
        info!(addr = %self.bind, "Admin server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin server shutting down");
            })
            .await?;
        Ok(())
    }
}

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started.elapsed().as_secs(),
        "tracked_clients": state.services.limiter.tracked_clients(),
    }))
}

async fn metrics_handler(State(state): State<AdminState>) -> Response {
    match state.services.registry.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response()
        }
    }
}

async fn metrics_json_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.services.registry.gather())
}

async fn alerts_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.services.evaluator.statuses())
}

#[derive(Debug, Deserialize)]
struct SilenceRequest {
    duration: String,
}

async fn silence_handler(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(request): Json<SilenceRequest>,
) -> Response {
    let duration = match parse_duration(&request.duration) {
        Ok(duration) => duration,
        Err(reason) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response();
        }
    };
    match state.services.evaluator.silence_for(&name, duration) {
        Ok(()) => {}
        Err(SilenceError::UnknownRule { .. }) => return unknown_alert(&name),
        Err(e @ SilenceError::TooLong { .. }) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    }
    (
        StatusCode::OK,
        Json(json!({ "alert": name, "silenced_secs": duration.as_secs_f64() })),
    )
        .into_response()
}

async fn unsilence_handler(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    if !state.services.evaluator.unsilence(&name) {
        return unknown_alert(&name);
    }
    StatusCode::NO_CONTENT.into_response()
}

fn unknown_alert(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown alert '{name}'") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use lexigate_core::ManualClock;
    use lexigate_core::alerts::RecordingNotifier;
    use lexigate_core::config::Config;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn admin() -> (AdminServer, CoreServices) {
        let services = CoreServices::build(
            &Config::default(),
            Arc::new(ManualClock::new()),
            Arc::new(RecordingNotifier::new()),
        )
        .unwrap();
        (AdminServer::new(services.clone(), "127.0.0.1:0"), services)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (admin, _services) = admin();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = admin.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert!(json["version"].is_string());
        assert!(json["uptime_seconds"].is_number());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (admin, services) = admin();
        services.limiter.admit("10.0.0.1");

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = admin.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("Content-Type header should be present");
        assert!(content_type.to_str().unwrap().contains("openmetrics"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("ratelimit_requests_total{outcome=\"allowed\"} 1"));
        assert!(text.contains("ratelimit_client_requests{client=\"10.0.0.1\"} 1"));
    }

    #[tokio::test]
    async fn test_metrics_json_endpoint() {
        let (admin, services) = admin();
        services.registry.observe_histogram("op.duration", 0.12, &[]);

        let request = Request::builder()
            .uri("/metrics/json")
            .body(Body::empty())
            .unwrap();
        let json = body_json(admin.router().oneshot(request).await.unwrap()).await;

        let series = json["series"].as_array().unwrap();
        let histogram = series
            .iter()
            .find(|s| s["name"] == "op.duration")
            .expect("histogram should be exported");
        assert_eq!(histogram["type"], "histogram");
        assert_eq!(histogram["count"], 1);
    }

    #[tokio::test]
    async fn test_alerts_endpoint() {
        let (admin, _services) = admin();
        let request = Request::builder()
            .uri("/alerts")
            .body(Body::empty())
            .unwrap();
        let json = body_json(admin.router().oneshot(request).await.unwrap()).await;

        let alerts = json.as_array().unwrap();
        assert_eq!(alerts.len(), 4);
        assert_eq!(alerts[0]["name"], "HighRejectRate");
        assert_eq!(alerts[0]["state"], "pending");
        assert_eq!(alerts[0]["severity"], "warning");
    }

    #[tokio::test]
    async fn test_silence_and_unsilence() {
        let (admin, services) = admin();
        let request = Request::builder()
            .method("POST")
            .uri("/alerts/HighErrorRate/silence")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"duration":"30m"}"#))
            .unwrap();
        let response = admin.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(services.evaluator.state("HighErrorRate").unwrap().silenced_until.is_some());

        let request = Request::builder()
            .method("DELETE")
            .uri("/alerts/HighErrorRate/silence")
            .body(Body::empty())
            .unwrap();
        let response = admin.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(services.evaluator.state("HighErrorRate").unwrap().silenced_until.is_none());
    }

    #[tokio::test]
    async fn test_silence_errors() {
        let (admin, _services) = admin();

        let request = Request::builder()
            .method("POST")
            .uri("/alerts/DiskFull/silence")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"duration":"5m"}"#))
            .unwrap();
        let response = admin.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method("POST")
            .uri("/alerts/HighErrorRate/silence")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"duration":"forever"}"#))
            .unwrap();
        let response = admin.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let request = Request::builder()
            .method("POST")
            .uri("/alerts/HighErrorRate/silence")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"duration":"500000000000years"}"#))
            .unwrap();
        let response = admin.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("too long"));
    }
}
