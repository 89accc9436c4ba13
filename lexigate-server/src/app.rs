//! Application listener.
//!
//! The vocabulary API lives elsewhere; this module wraps any router in the
//! governance middleware and serves it with peer addresses attached.

use std::net::SocketAddr;

use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
use lexigate_core::governance::RequestGovernor;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ServerError, ServerResult};
use crate::middleware::governance;

/// Put `router` behind admission control and request instrumentation.
pub fn governed(router: Router, governor: RequestGovernor) -> Router {
    router.layer(from_fn_with_state(governor, governance))
}

/// Routes served by the standalone binary.
pub fn default_routes() -> Router {
    Router::new().route("/api/ping", get(ping))
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Bind `addr` and serve `router` until `shutdown` is cancelled.
pub async fn serve(addr: &str, router: Router, shutdown: CancellationToken) -> ServerResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(addr = %addr, "Application server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
        info!("Application server shutting down");
    })
    .await?;
    Ok(())
}
