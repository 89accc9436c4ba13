//! Immutable point-in-time copies of the metric registry.
//!
//! A [`MetricsSnapshot`] is produced by [`MetricRegistry::gather`] while the
//! registry lock is held, so it never contains a half-applied write. It owns
//! all of its data and can be handed to alert rules, serialized to JSON or
//! encoded as OpenMetrics text.
//!
//! [`MetricRegistry::gather`]: super::MetricRegistry::gather

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Kind of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter => write!(f, "counter"),
            Self::Gauge => write!(f, "gauge"),
            Self::Histogram => write!(f, "histogram"),
        }
    }
}

/// Histogram state at snapshot time.
///
/// `cumulative_counts[i]` is the number of observations `<= bounds[i]`.
/// Observations above the last bound only show up in `count`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    pub cumulative_counts: Vec<u64>,
    pub count: u64,
    pub sum: f64,
}

impl HistogramSnapshot {
    /// Arithmetic mean of all observations, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Per-bucket counts including a trailing `+Inf` bucket.
    ///
    /// The returned upper bound of the overflow bucket is `f64::MAX`.
    pub fn bucket_counts(&self) -> Vec<(f64, u64)> {
        let mut previous = 0;
        let mut buckets = Vec::with_capacity(self.bounds.len() + 1);
        for (bound, cumulative) in self.bounds.iter().zip(&self.cumulative_counts) {
            buckets.push((*bound, cumulative - previous));
            previous = *cumulative;
        }
        buckets.push((f64::MAX, self.count - previous));
        buckets
    }

    /// Estimate the `q` quantile (0.0..=1.0).
    ///
    /// This is an approximation: the value is linearly interpolated inside
    /// the bucket holding the target rank, assuming observations are spread
    /// evenly between its bounds. Ranks that fall in the overflow bucket
    /// return the last finite bound. Returns `None` for an empty histogram
    /// or a `q` outside `0.0..=1.0`.
    pub fn approx_quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=1.0).contains(&q) {
            return None;
        }
        let rank = q * self.count as f64;
        let mut lower = 0.0;
        let mut below = 0u64;
        for (bound, cumulative) in self.bounds.iter().zip(&self.cumulative_counts) {
            if *cumulative as f64 >= rank {
                let in_bucket = (cumulative - below) as f64;
                if in_bucket == 0.0 {
                    return Some(*bound);
                }
                let fraction = (rank - below as f64) / in_bucket;
                return Some(lower + (bound - lower) * fraction);
            }
            lower = *bound;
            below = *cumulative;
        }
        self.bounds.last().copied()
    }
}

/// Value of a single series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SeriesValue {
    Counter { value: f64 },
    Gauge { value: f64 },
    Histogram(HistogramSnapshot),
}

impl SeriesValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Gauge { .. } => MetricKind::Gauge,
            Self::Histogram(_) => MetricKind::Histogram,
        }
    }

    /// Scalar value for counters and gauges; sample count for histograms.
    pub fn scalar(&self) -> f64 {
        match self {
            Self::Counter { value } | Self::Gauge { value } => *value,
            Self::Histogram(h) => h.count as f64,
        }
    }
}

/// One series: metric name, label set and value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub help: String,
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    /// True when every `(key, value)` in `filter` is present on this series.
    pub fn matches(&self, filter: &[(&str, &str)]) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.labels.get(*k).is_some_and(|actual| actual == v))
    }

    fn is_exactly(&self, labels: &[(&str, &str)]) -> bool {
        self.labels.len() == labels.len() && self.matches(labels)
    }
}

/// Point-in-time copy of every series in a registry, ordered by name then
/// labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub series: Vec<SeriesSnapshot>,
}

impl MetricsSnapshot {
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeriesSnapshot> {
        self.series.iter()
    }

    /// Series grouped by metric name.
    pub fn families(&self) -> impl Iterator<Item = &[SeriesSnapshot]> {
        self.series.chunk_by(|a, b| a.name == b.name)
    }

    /// Series with exactly this name and label set.
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<&SeriesSnapshot> {
        self.series
            .iter()
            .find(|s| s.name == name && s.is_exactly(labels))
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        match self.get(name, labels)?.value {
            SeriesValue::Counter { value } => Some(value),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        match self.get(name, labels)?.value {
            SeriesValue::Gauge { value } => Some(value),
            _ => None,
        }
    }

    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Option<&HistogramSnapshot> {
        match &self.get(name, labels)?.value {
            SeriesValue::Histogram(h) => Some(h),
            _ => None,
        }
    }

    /// Sum of [`SeriesValue::scalar`] over every series of `name` whose
    /// labels include `filter`. Missing metrics sum to zero.
    pub fn sum(&self, name: &str, filter: &[(&str, &str)]) -> f64 {
        self.series
            .iter()
            .filter(|s| s.name == name && s.matches(filter))
            .map(|s| s.value.scalar())
            .sum()
    }

    /// Merged `(count, sum)` of every histogram series of `name` whose labels
    /// include `filter`.
    pub fn histogram_totals(&self, name: &str, filter: &[(&str, &str)]) -> (u64, f64) {
        self.series
            .iter()
            .filter(|s| s.name == name && s.matches(filter))
            .filter_map(|s| match &s.value {
                SeriesValue::Histogram(h) => Some((h.count, h.sum)),
                _ => None,
            })
            .fold((0, 0.0), |(count, sum), (c, s)| (count + c, sum + s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram(bounds: &[f64], values: &[f64]) -> HistogramSnapshot {
        let cumulative_counts = bounds
            .iter()
            .map(|b| values.iter().filter(|v| *v <= b).count() as u64)
            .collect();
        HistogramSnapshot {
            bounds: bounds.to_vec(),
            cumulative_counts,
            count: values.len() as u64,
            sum: values.iter().sum(),
        }
    }

    #[test]
    fn test_bucket_counts_are_not_cumulative() {
        let h = histogram(&[1.0, 2.0], &[0.5, 1.5, 1.7, 9.0]);
        assert_eq!(h.bucket_counts(), vec![(1.0, 1), (2.0, 2), (f64::MAX, 1)]);
    }

    #[test]
    fn test_mean_of_empty_histogram_is_none() {
        let h = histogram(&[1.0], &[]);
        assert_eq!(h.mean(), None);
        assert_eq!(h.approx_quantile(0.5), None);
    }

    #[test]
    fn test_approx_quantile_interpolates_within_bucket() {
        // Ten observations all in (1.0, 2.0]: the median lands mid-bucket.
        let h = histogram(&[1.0, 2.0, 4.0], &[1.5; 10]);
        let p50 = h.approx_quantile(0.5).unwrap();
        assert!((p50 - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_approx_quantile_overflow_returns_last_bound() {
        let h = histogram(&[1.0], &[5.0, 6.0]);
        assert_eq!(h.approx_quantile(0.99), Some(1.0));
        assert_eq!(h.approx_quantile(1.5), None);
    }

    #[test]
    fn test_sum_filters_by_label_subset() {
        let snapshot = MetricsSnapshot {
            series: vec![
                SeriesSnapshot {
                    name: "reqs".into(),
                    help: String::new(),
                    labels: BTreeMap::from([("outcome".into(), "allowed".into())]),
                    value: SeriesValue::Counter { value: 3.0 },
                },
                SeriesSnapshot {
                    name: "reqs".into(),
                    help: String::new(),
                    labels: BTreeMap::from([("outcome".into(), "rejected".into())]),
                    value: SeriesValue::Counter { value: 2.0 },
                },
            ],
        };

        assert_eq!(snapshot.sum("reqs", &[]), 5.0);
        assert_eq!(snapshot.sum("reqs", &[("outcome", "rejected")]), 2.0);
        assert_eq!(snapshot.sum("missing", &[]), 0.0);
        assert_eq!(snapshot.counter("reqs", &[("outcome", "allowed")]), Some(3.0));
        assert_eq!(snapshot.counter("reqs", &[]), None);
        assert_eq!(snapshot.families().count(), 1);
    }
}
