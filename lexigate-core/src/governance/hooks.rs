//! Per-request hooks for the HTTP layer.
//!
//! The router calls [`RequestGovernor::on_request_start`] before dispatch and
//! [`RequestGovernor::on_request_complete`] once a status is known. Nothing
//! recorded here can fail a request; the only in-band signal is the
//! admit/reject decision.

use std::sync::Arc;

use crate::config::ConfigError;
use crate::telemetry::{DEFAULT_BUCKETS, Instrumentation, MetricDescriptor, Outcome, RequestTimer};

use super::rate_limiter::RateLimiter;

/// Histogram of request latency in seconds, labelled by `operation`.
pub const HTTP_DURATION: &str = "http_request.duration";
/// Counter of completed requests, labelled by `operation` and `outcome`.
pub const HTTP_REQUESTS: &str = "http_requests";
/// Counter of responses, labelled by `status_class` (`2xx`, `5xx`, ...).
pub const HTTP_RESPONSES: &str = "http_responses";

/// Result of [`RequestGovernor::on_request_start`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub admitted: bool,
    pub retry_after_secs: f64,
}

impl Admission {
    /// `Retry-After` header value: whole seconds, rounded up, at least 1.
    pub fn retry_after_header(&self) -> u64 {
        (self.retry_after_secs.ceil() as u64).max(1)
    }
}

/// Facade over the rate limiter and request instrumentation.
#[derive(Debug, Clone)]
pub struct RequestGovernor {
    limiter: Arc<RateLimiter>,
    instrumentation: Instrumentation,
}

impl RequestGovernor {
    /// Declare the HTTP metric families and build the governor.
    pub fn new(limiter: Arc<RateLimiter>, instrumentation: Instrumentation) -> Result<Self, ConfigError> {
        let registry = instrumentation.registry();
        registry.register(
            MetricDescriptor::histogram(HTTP_DURATION, "HTTP request latency in seconds", DEFAULT_BUCKETS)
                .with_labels(&["operation"]),
        )?;
        registry.register(
            MetricDescriptor::counter(HTTP_REQUESTS, "Completed HTTP requests")
                .with_labels(&["operation", "outcome"]),
        )?;
        registry.register(
            MetricDescriptor::counter(HTTP_RESPONSES, "HTTP responses by status class")
                .with_labels(&["status_class"])
                .with_max_label_values(6),
        )?;
        Ok(Self {
            limiter,
            instrumentation,
        })
    }

    /// Admission check, called before the handler runs.
    pub fn on_request_start(&self, client_id: &str) -> Admission {
        let result = self.limiter.admit(client_id);
        Admission {
            admitted: result.allowed,
            retry_after_secs: result.retry_after.as_secs_f64(),
        }
    }

    /// Record a finished request. `operation` must come from a bounded set
    /// (e.g. `"GET /api/words/{id}"`), never a raw path.
    pub fn on_request_complete(&self, operation: &str, duration_secs: f64, status_code: u16) {
        let registry = self.instrumentation.registry();
        let outcome = Outcome::from_status(status_code);
        registry.observe_histogram(HTTP_DURATION, duration_secs, &[("operation", operation)]);
        registry.inc_counter(
            HTTP_REQUESTS,
            &[("operation", operation), ("outcome", outcome.as_str())],
        );
        registry.inc_counter(HTTP_RESPONSES, &[("status_class", status_class(status_code))]);
    }

    /// Start a per-operation timer (`http.get.api.words.id.duration`, ...).
    pub fn start_timer(&self, method: &str, route: &str) -> RequestTimer {
        self.instrumentation
            .start(&operation_metric_name(method, route))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }
}

/// Metric-safe operation prefix: `GET /api/words/{id}` → `http.get.api.words.id`.
pub fn operation_metric_name(method: &str, route: &str) -> String {
    let mut name = String::from("http.");
    name.push_str(&method.to_ascii_lowercase());
    for segment in route
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
    {
        name.push('.');
        name.push_str(&segment.to_ascii_lowercase());
    }
    name
}

fn status_class(status_code: u16) -> &'static str {
    match status_code {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
