//! Request governance: admission control and per-request hooks.

pub mod hooks;
pub mod rate_limiter;

pub use hooks::{Admission, RequestGovernor, operation_metric_name};
pub use rate_limiter::{ANONYMOUS_CLIENT, AdmitResult, RateLimiter, RateLimiterConfig};
