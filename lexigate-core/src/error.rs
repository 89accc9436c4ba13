//! Metric write errors.
//!
//! None of these reach the request path. The registry converts each one into
//! a `dropped_metric_writes{reason}` increment and a debug log line.

use thiserror::Error;

use crate::telemetry::MetricKind;

/// Reasons a metric registration or write is refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    /// Name does not match `[A-Za-z_][A-Za-z0-9_.:]*`.
    #[error("invalid metric name '{name}'")]
    InvalidName { name: String },

    /// The series exists with another kind.
    #[error("metric '{name}' is a {registered}, not a {requested}")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    /// Supplied label keys differ from the declared keys.
    #[error("metric '{name}' declares labels {expected:?}, got {got:?}")]
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    /// A label would gain a new value beyond its declared ceiling.
    #[error("label '{label}' of metric '{name}' exceeded {limit} distinct values")]
    CardinalityExceeded {
        name: String,
        label: String,
        limit: usize,
    },

    /// The registry-wide series ceiling was reached.
    #[error("registry series limit of {limit} reached (metric '{name}')")]
    SeriesLimitReached { name: String, limit: usize },

    /// NaN, infinite, or a negative counter increment.
    #[error("invalid value {value} for metric '{name}'")]
    InvalidValue { name: String, value: f64 },

    /// Histogram bucket bounds are malformed.
    #[error("invalid histogram buckets for '{name}': {reason}")]
    InvalidBuckets { name: String, reason: String },

    /// The name is already registered with a different descriptor.
    #[error("metric '{name}' already registered with a different definition")]
    Conflict { name: String },
}

impl MetricsError {
    /// Bounded label value for `dropped_metric_writes{reason}`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidName { .. } => "invalid_name",
            Self::KindMismatch { .. } => "kind_mismatch",
            Self::LabelMismatch { .. } => "label_mismatch",
            Self::CardinalityExceeded { .. } => "cardinality_exceeded",
            Self::SeriesLimitReached { .. } => "series_limit",
            Self::InvalidValue { .. } => "invalid_value",
            Self::InvalidBuckets { .. } => "invalid_buckets",
            Self::Conflict { .. } => "conflict",
        }
    }
}
