//! Request governance middleware.
//!
//! Every request is admitted (or refused with 429) by the rate limiter, then
//! timed. The client key is the peer IP from `ConnectInfo`; forwarding
//! headers are not trusted. Requests without connection info (in-process
//! tests, unix sockets) share the anonymous bucket.
//!
//! Operation labels use the router's matched path, so raw paths with IDs
//! never reach a metric label.

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lexigate_core::governance::RequestGovernor;
use lexigate_core::telemetry::Outcome;
use serde_json::json;

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Admission and instrumentation for one request.
///
/// Install with `axum::middleware::from_fn_with_state(governor, governance)`
/// as a router-level layer so `MatchedPath` is available.
pub async fn governance(
    State(governor): State<RequestGovernor>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();

    let admission = governor.on_request_start(&client);
    if !admission.admitted {
        return too_many_requests(admission.retry_after_header());
    }

    let method = request.method().as_str().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());

    let timer = governor.start_timer(&method, &route);
    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = timer
        .stop(Outcome::from_status(status), status)
        .unwrap_or_else(|| timer.elapsed());
    governor.on_request_complete(&format!("{method} {route}"), elapsed.as_secs_f64(), status);

    response
}

fn too_many_requests(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "rate limit exceeded",
            "retry_after_secs": retry_after_secs,
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}
