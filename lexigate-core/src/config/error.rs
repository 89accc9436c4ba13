//! Configuration error types.
//!
//! Every variant is fatal at startup. None is produced while serving
//! requests.

use std::path::PathBuf;
use thiserror::Error;

use crate::error::MetricsError;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Value validation
    // ─────────────────────────────────────────────────────────────────────────
    /// `rateLimit.windowDuration` is zero.
    #[error("rate limit window must be greater than zero")]
    InvalidWindow,

    /// `rateLimit.requestsPerWindow` is zero.
    #[error("invalid requestsPerWindow {value}: must be > 0")]
    InvalidRateLimit { value: u32 },

    /// A periodic task interval is zero.
    #[error("invalid {field}: interval must be greater than zero")]
    InvalidInterval { field: &'static str },

    /// A ceiling that must be positive is zero.
    #[error("invalid {field}: must be > 0")]
    InvalidLimit { field: &'static str },

    /// An alert threshold is negative or not finite.
    #[error("invalid threshold {threshold} for alert '{rule}'")]
    InvalidThreshold { rule: String, threshold: f64 },

    /// Duplicate alert rule name.
    #[error("duplicate alert rule '{name}'")]
    DuplicateAlertRule { name: String },

    /// Metric declaration rejected (malformed buckets, conflicting names).
    #[error("metric declaration rejected: {0}")]
    Metrics(#[from] MetricsError),

    // ─────────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────────
    /// Required environment variable referenced by `${VAR}` is unset.
    #[error("environment variable '{var}' not set")]
    MissingEnvVar { var: String },

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading the config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// An explicitly requested config file does not exist.
    #[error("configuration file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },
}

/// Non-fatal findings reported while validating a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// `alerts.<name>` does not match a built-in rule and is ignored.
    UnknownAlertRule { name: String },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAlertRule { name } => {
                write!(f, "alert '{name}' is not a known rule and will be ignored")
            }
        }
    }
}
