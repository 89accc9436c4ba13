//! Centralized default values.
//!
//! Any key missing from the config file falls back to these values.

use std::time::Duration;
use tracing::warn;

/// Requests admitted per client per window.
pub const REQUESTS_PER_WINDOW: u32 = 100;

/// Length of a rate-limit window.
pub const WINDOW_DURATION: Duration = Duration::from_secs(60);

/// How often stale client windows are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Distinct clients tracked by the per-client gauge.
pub const CLIENT_GAUGE_LIMIT: usize = 100;

/// Registry-wide series ceiling.
pub const MAX_SERIES: usize = 10_000;

/// Distinct values per label key unless a metric declares its own.
pub const MAX_LABEL_VALUES: usize = 100;

/// How often process and runtime resource gauges are refreshed.
pub const RESOURCE_INTERVAL: Duration = Duration::from_secs(15);

/// Alert evaluation tick.
pub const EVALUATION_INTERVAL: Duration = Duration::from_secs(10);

/// Application listener.
pub const BIND: &str = "0.0.0.0:8080";

/// Admin listener (`/metrics`, `/alerts`, `/health`).
pub const ADMIN_BIND: &str = "127.0.0.1:9090";

/// Parse an environment variable, warning and keeping `default` when the
/// value does not parse or is rejected by `accept`.
pub(crate) fn parse_env_warn<T>(name: &str, default: T, accept: impl Fn(&T) -> bool) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(val) => match val.trim().parse::<T>() {
            Ok(parsed) if accept(&parsed) => parsed,
            _ => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Read an optional override. `None` when the variable is unset or its
/// value is rejected; rejections are logged.
pub(crate) fn parse_env_override<T>(name: &str, accept: impl Fn(&T) -> bool) -> Option<T>
where
    T: std::str::FromStr,
{
    let val = std::env::var(name).ok()?;
    match val.trim().parse::<T>() {
        Ok(parsed) if accept(&parsed) => Some(parsed),
        _ => {
            warn!(
                env_var = name,
                value = %val,
                "Invalid value for environment variable, keeping configured value"
            );
            None
        }
    }
}
