//! Configuration schema.
//!
//! Every section and key is optional; missing values take the defaults from
//! [`super::defaults`].
//!
//! # Example
//! ```yaml
//! rateLimit:
//!   requestsPerWindow: 100
//!   windowDuration: 1m
//!
//! alerts:
//!   HighRejectRate:
//!     threshold: 0.5
//!     minReNotifyInterval: 15m
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::defaults;
use super::duration_format;
use crate::alerts::Severity;
use crate::governance::RateLimiterConfig;
use crate::telemetry::RegistryLimits;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub rate_limit: RateLimitConfig,
    pub metrics: MetricsConfig,
    pub alerting: AlertingConfig,
    /// Per-rule overrides keyed by rule name (`HighRejectRate`, ...).
    pub alerts: BTreeMap<String, AlertRuleConfig>,
    pub server: ServerConfig,
}

/// `rateLimit` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    #[serde(with = "duration_format")]
    pub window_duration: Duration,
    #[serde(with = "duration_format")]
    pub sweep_interval: Duration,
    /// Distinct clients exported by `ratelimit_client_requests`.
    pub client_gauge_limit: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: defaults::REQUESTS_PER_WINDOW,
            window_duration: defaults::WINDOW_DURATION,
            sweep_interval: defaults::SWEEP_INTERVAL,
            client_gauge_limit: defaults::CLIENT_GAUGE_LIMIT,
        }
    }
}

impl RateLimitConfig {
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_window: self.requests_per_window,
            window: self.window_duration,
            client_gauge_limit: self.client_gauge_limit,
        }
    }
}

/// `metrics` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsConfig {
    pub max_series: usize,
    pub max_label_values: usize,
    /// Refresh period of the `process_*` and `runtime_*` gauges.
    #[serde(with = "duration_format")]
    pub resource_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_series: defaults::MAX_SERIES,
            max_label_values: defaults::MAX_LABEL_VALUES,
            resource_interval: defaults::RESOURCE_INTERVAL,
        }
    }
}

impl MetricsConfig {
    pub fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            max_series: self.max_series,
            max_label_values: self.max_label_values,
        }
    }
}

/// `alerting` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertingConfig {
    #[serde(with = "duration_format")]
    pub evaluation_interval: Duration,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: defaults::EVALUATION_INTERVAL,
        }
    }
}

/// `alerts.<ruleName>` entry. Unset fields keep the rule's built-in values.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertRuleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(
        with = "duration_format::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_re_notify_interval: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub enabled: bool,
}

impl Default for AlertRuleConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            min_re_notify_interval: None,
            severity: None,
            enabled: true,
        }
    }
}

/// `server` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
    pub admin_bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND.to_string(),
            admin_bind: defaults::ADMIN_BIND.to_string(),
        }
    }
}
