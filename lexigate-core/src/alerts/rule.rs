//! Alert rule definitions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::telemetry::MetricsSnapshot;

/// Alert severity. Controls the default re-notification interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Minimum gap between repeated notifications of a firing rule.
    pub fn default_renotify_interval(self) -> Duration {
        match self {
            Self::Critical => Duration::from_secs(5 * 60),
            Self::Warning => Duration::from_secs(15 * 60),
            Self::Info => Duration::from_secs(60 * 60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects one metric and an optional label subset. The selected value is
/// the sum over every matching series; absent series read as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSelector {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesSelector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self) -> Vec<(&str, &str)> {
        self.labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Sum of matching counter/gauge values (histograms contribute their count).
    pub fn value(&self, snapshot: &MetricsSnapshot) -> f64 {
        snapshot.sum(&self.name, &self.filter())
    }

    /// `(count, sum)` over matching histograms.
    pub fn histogram_totals(&self, snapshot: &MetricsSnapshot) -> (u64, f64) {
        snapshot.histogram_totals(&self.name, &self.filter())
    }

    /// Growth of the selected value from `previous` to `current`.
    ///
    /// A value lower than before means the series restarted, so the whole
    /// current value counts as growth.
    pub fn increase(&self, current: &MetricsSnapshot, previous: &MetricsSnapshot) -> f64 {
        let (now, before) = (self.value(current), self.value(previous));
        if now >= before { now - before } else { now }
    }

    /// Histogram `(count, sum)` added between `previous` and `current`.
    pub fn histogram_increase(
        &self,
        current: &MetricsSnapshot,
        previous: &MetricsSnapshot,
    ) -> (u64, f64) {
        let (count, sum) = self.histogram_totals(current);
        let (count_before, sum_before) = self.histogram_totals(previous);
        if count >= count_before {
            (count - count_before, sum - sum_before)
        } else {
            (count, sum)
        }
    }
}

/// User-supplied predicate over a snapshot.
pub type ConditionFn = Arc<dyn Fn(&MetricsSnapshot) -> bool + Send + Sync>;

/// What a rule checks.
///
/// Every variant except [`Condition::Above`] and [`Condition::Custom`] works
/// on the interval between two snapshots: what was added to the counters
/// since the previous evaluation, not their totals since start.
#[derive(Clone)]
pub enum Condition {
    /// Current selected value strictly above `threshold`. Suits gauges.
    Above {
        selector: SeriesSelector,
        threshold: f64,
    },
    /// Growth of the selected counter over the interval strictly above
    /// `threshold`.
    IncreaseAbove {
        selector: SeriesSelector,
        threshold: f64,
    },
    /// `numerator / denominator` over the interval strictly above
    /// `threshold`. False while the interval's denominator is below
    /// `min_samples` or zero.
    RatioAbove {
        numerator: SeriesSelector,
        denominator: SeriesSelector,
        threshold: f64,
        min_samples: u64,
    },
    /// Mean of the observations made during the interval strictly above
    /// `threshold`. False while there are fewer than `min_samples`.
    MeanAbove {
        histogram: SeriesSelector,
        threshold: f64,
        min_samples: u64,
    },
    Custom(ConditionFn),
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Above {
                selector,
                threshold,
            } => f
                .debug_struct("Above")
                .field("selector", selector)
                .field("threshold", threshold)
                .finish(),
            Self::IncreaseAbove {
                selector,
                threshold,
            } => f
                .debug_struct("IncreaseAbove")
                .field("selector", selector)
                .field("threshold", threshold)
                .finish(),
            Self::RatioAbove {
                numerator,
                denominator,
                threshold,
                min_samples,
            } => f
                .debug_struct("RatioAbove")
                .field("numerator", numerator)
                .field("denominator", denominator)
                .field("threshold", threshold)
                .field("min_samples", min_samples)
                .finish(),
            Self::MeanAbove {
                histogram,
                threshold,
                min_samples,
            } => f
                .debug_struct("MeanAbove")
                .field("histogram", histogram)
                .field("threshold", threshold)
                .field("min_samples", min_samples)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Outcome of checking one condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub met: bool,
    /// Observed value (ratio, mean, total). `None` for custom conditions
    /// and for ratios/means without enough samples.
    pub value: Option<f64>,
}

impl Condition {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&MetricsSnapshot) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Check the condition against `current`, with `previous` as the start
    /// of the interval. Missing series read as zero; pass an empty snapshot
    /// as `previous` to cover everything since start.
    pub fn evaluate(&self, current: &MetricsSnapshot, previous: &MetricsSnapshot) -> Evaluation {
        match self {
            Self::Above {
                selector,
                threshold,
            } => {
                let value = selector.value(current);
                Evaluation {
                    met: value > *threshold,
                    value: Some(value),
                }
            }
            Self::IncreaseAbove {
                selector,
                threshold,
            } => {
                let value = selector.increase(current, previous);
                Evaluation {
                    met: value > *threshold,
                    value: Some(value),
                }
            }
            Self::RatioAbove {
                numerator,
                denominator,
                threshold,
                min_samples,
            } => {
                let total = denominator.increase(current, previous);
                if total <= 0.0 || total < *min_samples as f64 {
                    return Evaluation {
                        met: false,
                        value: None,
                    };
                }
                let ratio = numerator.increase(current, previous) / total;
                Evaluation {
                    met: ratio > *threshold,
                    value: Some(ratio),
                }
            }
            Self::MeanAbove {
                histogram,
                threshold,
                min_samples,
            } => {
                let (count, sum) = histogram.histogram_increase(current, previous);
                if count == 0 || count < *min_samples {
                    return Evaluation {
                        met: false,
                        value: None,
                    };
                }
                let mean = sum / count as f64;
                Evaluation {
                    met: mean > *threshold,
                    value: Some(mean),
                }
            }
            Self::Custom(f) => Evaluation {
                met: f(current),
                value: None,
            },
        }
    }
}

/// Static rule definition. Immutable once handed to the evaluator.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub severity: Severity,
    pub condition: Condition,
    pub min_renotify_interval: Duration,
}

impl AlertRule {
    /// Rule with the severity's default re-notification interval.
    pub fn new(name: &str, severity: Severity, condition: Condition) -> Self {
        Self {
            name: name.to_string(),
            severity,
            condition,
            min_renotify_interval: severity.default_renotify_interval(),
        }
    }

    pub fn with_min_renotify_interval(mut self, interval: Duration) -> Self {
        self.min_renotify_interval = interval;
        self
    }
}
