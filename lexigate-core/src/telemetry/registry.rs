//! In-process metric registry.
//!
//! The registry owns every counter, gauge and histogram series. All access
//! goes through one `parking_lot::Mutex`, so writes never interleave with a
//! [`MetricRegistry::gather`] and snapshots are internally consistent.
//!
//! # Label discipline
//!
//! Labelled metrics must be declared with a [`MetricDescriptor`] listing
//! their label keys. Each key accepts at most `max_label_values` distinct
//! values; unlabelled metrics may be created lazily on first write. Writes
//! that break these rules are dropped and counted in
//! `dropped_metric_writes{reason}` instead of failing the caller.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use super::cardinality::CardinalityGuard;
use super::snapshot::{HistogramSnapshot, MetricKind, MetricsSnapshot, SeriesSnapshot, SeriesValue};
use crate::error::MetricsError;

/// Name of the counter tracking refused writes.
pub const DROPPED_WRITES: &str = "dropped_metric_writes";

/// Buckets (seconds) for histograms created without a descriptor.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Distinct `reason` values of `dropped_metric_writes`.
const DROP_REASONS: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Declaration of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    name: String,
    help: String,
    kind: MetricKind,
    label_keys: Vec<String>,
    max_label_values: Option<usize>,
    buckets: Vec<f64>,
    allow_non_positive: bool,
}

impl MetricDescriptor {
    fn new(name: &str, help: &str, kind: MetricKind) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            label_keys: Vec::new(),
            max_label_values: None,
            buckets: Vec::new(),
            allow_non_positive: false,
        }
    }

    pub fn counter(name: &str, help: &str) -> Self {
        Self::new(name, help, MetricKind::Counter)
    }

    pub fn gauge(name: &str, help: &str) -> Self {
        Self::new(name, help, MetricKind::Gauge)
    }

    /// Histogram with explicit upper bounds.
    pub fn histogram(name: &str, help: &str, buckets: &[f64]) -> Self {
        Self {
            buckets: buckets.to_vec(),
            ..Self::new(name, help, MetricKind::Histogram)
        }
    }

    /// Declare the label keys every write must supply.
    pub fn with_labels(mut self, keys: &[&str]) -> Self {
        self.label_keys = keys.iter().map(|k| k.to_string()).collect();
        self.label_keys.sort();
        self
    }

    /// Override the registry-wide distinct-value ceiling for each label.
    pub fn with_max_label_values(mut self, max: usize) -> Self {
        self.max_label_values = Some(max);
        self
    }

    /// Allow a first bucket bound `<= 0` (e.g. for signed deltas).
    pub fn allow_non_positive(mut self) -> Self {
        self.allow_non_positive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    fn validate(&self) -> Result<(), MetricsError> {
        validate_name(&self.name)?;

        let mut keys = self.label_keys.clone();
        keys.dedup();
        if keys.len() != self.label_keys.len() || keys.iter().any(|k| validate_name(k).is_err()) {
            return Err(MetricsError::LabelMismatch {
                name: self.name.clone(),
                expected: Vec::new(),
                got: self.label_keys.clone(),
            });
        }

        if self.kind == MetricKind::Histogram {
            validate_buckets(&self.name, &self.buckets, self.allow_non_positive)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), MetricsError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(MetricsError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// Check histogram bounds: non-empty, finite, strictly increasing and, unless
/// allowed, starting above zero.
pub fn validate_buckets(
    name: &str,
    buckets: &[f64],
    allow_non_positive: bool,
) -> Result<(), MetricsError> {
    let invalid = |reason: &str| MetricsError::InvalidBuckets {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let first = buckets.first().ok_or_else(|| invalid("no bucket bounds"))?;
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(invalid("bounds must be finite"));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("bounds must be strictly increasing"));
    }
    if !allow_non_positive && *first <= 0.0 {
        return Err(invalid("first bound must be greater than zero"));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Series storage
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct HistogramCell {
    cumulative_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl HistogramCell {
    fn new(buckets: usize) -> Self {
        Self {
            cumulative_counts: vec![0; buckets],
            count: 0,
            sum: 0.0,
        }
    }

    fn observe(&mut self, bounds: &[f64], value: f64) {
        for (bound, count) in bounds.iter().zip(self.cumulative_counts.iter_mut()) {
            if value <= *bound {
                *count += 1;
            }
        }
        self.count += 1;
        self.sum += value;
    }
}

#[derive(Debug, Clone)]
enum Cell {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramCell),
}

/// Mutation applied to a resolved series.
enum Update {
    CounterAdd(f64),
    GaugeSet(f64),
    GaugeAdd(f64),
    Observe(f64),
}

impl Update {
    fn kind(&self) -> MetricKind {
        match self {
            Self::CounterAdd(_) => MetricKind::Counter,
            Self::GaugeSet(_) | Self::GaugeAdd(_) => MetricKind::Gauge,
            Self::Observe(_) => MetricKind::Histogram,
        }
    }

    fn value(&self) -> f64 {
        match self {
            Self::CounterAdd(v) | Self::GaugeSet(v) | Self::GaugeAdd(v) | Self::Observe(v) => *v,
        }
    }
}

#[derive(Debug)]
struct Family {
    descriptor: MetricDescriptor,
    /// One guard per declared label key, in key order.
    guards: Vec<CardinalityGuard>,
    /// Keyed by label values in declared key order.
    series: HashMap<Vec<String>, Cell>,
}

impl Family {
    fn new(descriptor: MetricDescriptor, default_max_label_values: usize) -> Self {
        let max = descriptor
            .max_label_values
            .unwrap_or(default_max_label_values);
        let guards = descriptor
            .label_keys
            .iter()
            .map(|_| CardinalityGuard::new(max))
            .collect();
        Self {
            descriptor,
            guards,
            series: HashMap::new(),
        }
    }

    fn empty_cell(&self) -> Cell {
        match self.descriptor.kind {
            MetricKind::Counter => Cell::Counter(0.0),
            MetricKind::Gauge => Cell::Gauge(0.0),
            MetricKind::Histogram => {
                Cell::Histogram(HistogramCell::new(self.descriptor.buckets.len()))
            }
        }
    }

    /// Map supplied `(key, value)` pairs onto declared key order.
    fn label_values(&self, labels: &[(&str, &str)]) -> Result<Vec<String>, MetricsError> {
        let keys = &self.descriptor.label_keys;
        let mismatch = || MetricsError::LabelMismatch {
            name: self.descriptor.name.clone(),
            expected: keys.clone(),
            got: labels.iter().map(|(k, _)| k.to_string()).collect(),
        };

        if labels.len() != keys.len() {
            return Err(mismatch());
        }
        keys.iter()
            .map(|key| {
                let mut found = labels.iter().filter(|(k, _)| *k == key.as_str());
                match (found.next(), found.next()) {
                    (Some((_, v)), None) => Ok(v.to_string()),
                    _ => Err(mismatch()),
                }
            })
            .collect()
    }

    fn to_series(&self, values: &[String], cell: &Cell) -> SeriesSnapshot {
        let labels: BTreeMap<String, String> = self
            .descriptor
            .label_keys
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect();
        let value = match cell {
            Cell::Counter(v) => SeriesValue::Counter { value: *v },
            Cell::Gauge(v) => SeriesValue::Gauge { value: *v },
            Cell::Histogram(h) => SeriesValue::Histogram(HistogramSnapshot {
                bounds: self.descriptor.buckets.clone(),
                cumulative_counts: h.cumulative_counts.clone(),
                count: h.count,
                sum: h.sum,
            }),
        };
        SeriesSnapshot {
            name: self.descriptor.name.clone(),
            help: self.descriptor.help.clone(),
            labels,
            value,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Ceilings applied by a [`MetricRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    /// Total series across all metrics.
    pub max_series: usize,
    /// Default distinct values per label key.
    pub max_label_values: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_series: 10_000,
            max_label_values: 100,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    families: HashMap<String, Family>,
    series_total: usize,
}

/// Thread-safe store of counters, gauges and histograms.
///
/// Construct one per process and share it as `Arc<MetricRegistry>`.
#[derive(Debug)]
pub struct MetricRegistry {
    inner: Mutex<Inner>,
    limits: RegistryLimits,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

impl MetricRegistry {
    /// Create an empty registry with the `dropped_metric_writes` counter
    /// pre-registered.
    pub fn new(limits: RegistryLimits) -> Self {
        let registry = Self {
            inner: Mutex::new(Inner::default()),
            limits,
        };
        let dropped = MetricDescriptor::counter(
            DROPPED_WRITES,
            "Metric writes refused by the registry",
        )
        .with_labels(&["reason"])
        .with_max_label_values(DROP_REASONS);
        let mut inner = registry.inner.lock();
        inner.families.insert(
            DROPPED_WRITES.to_string(),
            Family::new(dropped, limits.max_label_values),
        );
        drop(inner);
        registry
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Declare a metric family.
    ///
    /// Registering an identical descriptor twice is a no-op; a different
    /// descriptor under an existing name is a [`MetricsError::Conflict`].
    pub fn register(&self, descriptor: MetricDescriptor) -> Result<(), MetricsError> {
        descriptor.validate()?;
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.families.get(&descriptor.name) {
            if existing.descriptor == descriptor {
                return Ok(());
            }
            return Err(MetricsError::Conflict {
                name: descriptor.name,
            });
        }
        let name = descriptor.name.clone();
        inner
            .families
            .insert(name, Family::new(descriptor, self.limits.max_label_values));
        Ok(())
    }

    /// Increment a counter by one.
    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.write(name, labels, Update::CounterAdd(1.0));
    }

    /// Increment a counter by `delta` (must be finite and non-negative).
    pub fn add_counter(&self, name: &str, delta: f64, labels: &[(&str, &str)]) {
        self.write(name, labels, Update::CounterAdd(delta));
    }

    /// Record one histogram observation.
    pub fn observe_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.write(name, labels, Update::Observe(value));
    }

    /// Set a gauge.
    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.write(name, labels, Update::GaugeSet(value));
    }

    /// Set a gauge unless the write would push a label past its value
    /// ceiling. Returns `false` when skipped for that reason, which is not
    /// counted as a dropped write. Any other refusal is counted as usual.
    pub fn set_gauge_if_room(&self, name: &str, value: f64, labels: &[(&str, &str)]) -> bool {
        let result = self
            .inner
            .lock()
            .apply(name, labels, Update::GaugeSet(value), &self.limits);
        match result {
            Ok(()) => true,
            Err(MetricsError::CardinalityExceeded { .. }) => false,
            Err(err) => {
                debug!(metric = name, error = %err, "Dropped metric write");
                self.count_drop(err.reason());
                true
            }
        }
    }

    /// Add `delta` (possibly negative) to a gauge.
    pub fn add_gauge(&self, name: &str, delta: f64, labels: &[(&str, &str)]) {
        self.write(name, labels, Update::GaugeAdd(delta));
    }

    /// Remove one series, freeing its label-value slots.
    ///
    /// Returns `true` if the series existed.
    pub fn remove_series(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        let mut inner = self.inner.lock();
        let Some(family) = inner.families.get_mut(name) else {
            return false;
        };
        let Ok(values) = family.label_values(labels) else {
            return false;
        };
        if family.series.remove(&values).is_none() {
            return false;
        }
        for (guard, value) in family.guards.iter_mut().zip(&values) {
            guard.release(value);
        }
        inner.series_total -= 1;
        true
    }

    /// Copy every series as of now.
    pub fn gather(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let mut families: Vec<&Family> = inner.families.values().collect();
        families.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));

        let mut series = Vec::with_capacity(inner.series_total);
        for family in families {
            let mut entries: Vec<(&Vec<String>, &Cell)> = family.series.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            series.extend(
                entries
                    .into_iter()
                    .map(|(values, cell)| family.to_series(values, cell)),
            );
        }
        MetricsSnapshot { series }
    }

    /// Number of live series.
    pub fn series_count(&self) -> usize {
        self.inner.lock().series_total
    }

    /// Total of `dropped_metric_writes` across reasons.
    pub fn dropped_writes(&self) -> f64 {
        self.gather().sum(DROPPED_WRITES, &[])
    }

    /// Reset a counter series to zero. Only for tests.
    #[cfg(test)]
    pub fn reset_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let mut inner = self.inner.lock();
        if let Some(family) = inner.families.get_mut(name) {
            if let Ok(values) = family.label_values(labels) {
                if let Some(Cell::Counter(v)) = family.series.get_mut(&values) {
                    *v = 0.0;
                }
            }
        }
    }

    fn write(&self, name: &str, labels: &[(&str, &str)], update: Update) {
        let result = self.inner.lock().apply(name, labels, update, &self.limits);
        if let Err(err) = result {
            debug!(metric = name, error = %err, "Dropped metric write");
            self.count_drop(err.reason());
        }
    }

    /// Bypasses the guarded write path; `reason` is one of a closed set.
    fn count_drop(&self, reason: &'static str) {
        let mut inner = self.inner.lock();
        let Inner {
            families,
            series_total,
        } = &mut *inner;
        let Some(family) = families.get_mut(DROPPED_WRITES) else {
            return;
        };
        let key = vec![reason.to_string()];
        if !family.series.contains_key(&key) {
            family.guards[0].retain(reason);
            *series_total += 1;
        }
        if let Cell::Counter(v) = family.series.entry(key).or_insert(Cell::Counter(0.0)) {
            *v += 1.0;
        }
    }
}

impl Inner {
    fn apply(
        &mut self,
        name: &str,
        labels: &[(&str, &str)],
        update: Update,
        limits: &RegistryLimits,
    ) -> Result<(), MetricsError> {
        let value = update.value();
        let invalid_value = !value.is_finite()
            || (matches!(update, Update::CounterAdd(_)) && value < 0.0);
        if invalid_value {
            return Err(MetricsError::InvalidValue {
                name: name.to_string(),
                value,
            });
        }

        let requested = update.kind();
        if !self.families.contains_key(name) {
            validate_name(name)?;
            if !labels.is_empty() {
                return Err(MetricsError::LabelMismatch {
                    name: name.to_string(),
                    expected: Vec::new(),
                    got: labels.iter().map(|(k, _)| k.to_string()).collect(),
                });
            }
            // A new name always needs a new series; refuse before the
            // family is created so it cannot linger empty.
            if self.series_total >= limits.max_series {
                return Err(MetricsError::SeriesLimitReached {
                    name: name.to_string(),
                    limit: limits.max_series,
                });
            }
            let descriptor = match requested {
                MetricKind::Counter => MetricDescriptor::counter(name, ""),
                MetricKind::Gauge => MetricDescriptor::gauge(name, ""),
                MetricKind::Histogram => MetricDescriptor::histogram(name, "", DEFAULT_BUCKETS),
            };
            self.families.insert(
                name.to_string(),
                Family::new(descriptor, limits.max_label_values),
            );
        }

        let Inner {
            families,
            series_total,
        } = self;
        let family = families
            .get_mut(name)
            .ok_or_else(|| MetricsError::InvalidName {
                name: name.to_string(),
            })?;

        if family.descriptor.kind != requested {
            return Err(MetricsError::KindMismatch {
                name: name.to_string(),
                registered: family.descriptor.kind,
                requested,
            });
        }

        let values = family.label_values(labels)?;
        if !family.series.contains_key(&values) {
            if *series_total >= limits.max_series {
                return Err(MetricsError::SeriesLimitReached {
                    name: name.to_string(),
                    limit: limits.max_series,
                });
            }
            if let Some((i, _)) = family
                .guards
                .iter()
                .zip(&values)
                .enumerate()
                .find(|(_, (guard, value))| !guard.admits(value))
            {
                return Err(MetricsError::CardinalityExceeded {
                    name: name.to_string(),
                    label: family.descriptor.label_keys[i].clone(),
                    limit: family.guards[i].limit(),
                });
            }
            for (guard, value) in family.guards.iter_mut().zip(&values) {
                guard.retain(value);
            }
            *series_total += 1;
            let cell = family.empty_cell();
            family.series.insert(values.clone(), cell);
        }

        let bounds = &family.descriptor.buckets;
        match (family.series.get_mut(&values), update) {
            (Some(Cell::Counter(v)), Update::CounterAdd(delta)) => *v += delta,
            (Some(Cell::Gauge(v)), Update::GaugeSet(value)) => *v = value,
            (Some(Cell::Gauge(v)), Update::GaugeAdd(delta)) => *v += delta,
            (Some(Cell::Histogram(h)), Update::Observe(value)) => h.observe(bounds, value),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MetricRegistry {
        MetricRegistry::default()
    }

    #[test]
    fn test_counter_created_lazily() {
        let registry = registry();
        registry.inc_counter("handler.word.get.success", &[]);
        registry.inc_counter("handler.word.get.success", &[]);

        let snapshot = registry.gather();
        assert_eq!(snapshot.counter("handler.word.get.success", &[]), Some(2.0));
    }

    #[test]
    fn test_histogram_scenario_three_observations() {
        let registry = registry();
        for _ in 0..3 {
            registry.observe_histogram("op.duration", 0.12, &[]);
        }

        let snapshot = registry.gather();
        let h = snapshot.histogram("op.duration", &[]).unwrap();
        assert_eq!(h.count, 3);
        assert!((h.sum - 0.36).abs() < 1e-9);
        assert_eq!(h.bounds, DEFAULT_BUCKETS);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let registry = registry();
        registry
            .register(MetricDescriptor::histogram("latency", "", &[0.1, 0.5, 1.0]))
            .unwrap();
        registry.observe_histogram("latency", 0.05, &[]);
        registry.observe_histogram("latency", 0.3, &[]);
        registry.observe_histogram("latency", 2.0, &[]);

        let snapshot = registry.gather();
        let h = snapshot.histogram("latency", &[]).unwrap();
        assert_eq!(h.cumulative_counts, vec![1, 2, 2]);
        assert_eq!(h.count, 3);
    }

    #[test]
    fn test_gauge_set_and_add() {
        let registry = registry();
        registry.set_gauge("requests_in_flight", 3.0, &[]);
        registry.add_gauge("requests_in_flight", -1.0, &[]);

        assert_eq!(registry.gather().gauge("requests_in_flight", &[]), Some(2.0));
    }

    #[test]
    fn test_labelled_write_requires_descriptor() {
        let registry = registry();
        registry.inc_counter("http_requests", &[("route", "/words")]);

        let snapshot = registry.gather();
        assert!(snapshot.get("http_requests", &[("route", "/words")]).is_none());
        assert_eq!(
            snapshot.counter(DROPPED_WRITES, &[("reason", "label_mismatch")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_wrong_label_keys_rejected() {
        let registry = registry();
        registry
            .register(MetricDescriptor::counter("http_requests", "").with_labels(&["outcome"]))
            .unwrap();
        registry.inc_counter("http_requests", &[("status", "200")]);
        registry.inc_counter("http_requests", &[]);

        assert_eq!(registry.dropped_writes(), 2.0);
    }

    #[test]
    fn test_label_order_does_not_matter() {
        let registry = registry();
        registry
            .register(MetricDescriptor::counter("reqs", "").with_labels(&["method", "outcome"]))
            .unwrap();
        registry.inc_counter("reqs", &[("method", "GET"), ("outcome", "ok")]);
        registry.inc_counter("reqs", &[("outcome", "ok"), ("method", "GET")]);

        let snapshot = registry.gather();
        assert_eq!(
            snapshot.counter("reqs", &[("outcome", "ok"), ("method", "GET")]),
            Some(2.0)
        );
        assert_eq!(registry.series_count(), 1);
    }

    #[test]
    fn test_cardinality_exceeded_drops_write() {
        let registry = registry();
        registry
            .register(
                MetricDescriptor::gauge("client_requests", "")
                    .with_labels(&["client"])
                    .with_max_label_values(2),
            )
            .unwrap();
        registry.set_gauge("client_requests", 1.0, &[("client", "a")]);
        registry.set_gauge("client_requests", 1.0, &[("client", "b")]);
        registry.set_gauge("client_requests", 1.0, &[("client", "c")]);
        // Known values keep working after the ceiling is hit.
        registry.set_gauge("client_requests", 5.0, &[("client", "a")]);

        let snapshot = registry.gather();
        assert_eq!(snapshot.gauge("client_requests", &[("client", "a")]), Some(5.0));
        assert!(snapshot.get("client_requests", &[("client", "c")]).is_none());
        assert_eq!(
            snapshot.counter(DROPPED_WRITES, &[("reason", "cardinality_exceeded")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_remove_series_frees_cardinality_slot() {
        let registry = registry();
        registry
            .register(
                MetricDescriptor::gauge("client_requests", "")
                    .with_labels(&["client"])
                    .with_max_label_values(1),
            )
            .unwrap();
        registry.set_gauge("client_requests", 1.0, &[("client", "a")]);
        assert!(registry.remove_series("client_requests", &[("client", "a")]));
        assert!(!registry.remove_series("client_requests", &[("client", "a")]));

        registry.set_gauge("client_requests", 1.0, &[("client", "b")]);
        assert_eq!(
            registry.gather().gauge("client_requests", &[("client", "b")]),
            Some(1.0)
        );
        assert_eq!(registry.dropped_writes(), 0.0);
    }

    #[test]
    fn test_series_limit() {
        let registry = MetricRegistry::new(RegistryLimits {
            max_series: 2,
            max_label_values: 100,
        });
        registry.inc_counter("a", &[]);
        registry.inc_counter("b", &[]);
        registry.inc_counter("c", &[]);

        let snapshot = registry.gather();
        assert!(snapshot.get("c", &[]).is_none());
        assert_eq!(
            snapshot.counter(DROPPED_WRITES, &[("reason", "series_limit")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_refused_new_name_leaves_no_family() {
        let registry = MetricRegistry::new(RegistryLimits {
            max_series: 2,
            max_label_values: 100,
        });
        registry.inc_counter("a", &[]);
        registry.inc_counter("b", &[]);
        for name in ["c", "d", "e"] {
            registry.inc_counter(name, &[]);
        }
        assert!(!registry.inner.lock().families.contains_key("c"));
        assert_eq!(
            registry
                .gather()
                .counter(DROPPED_WRITES, &[("reason", "series_limit")]),
            Some(3.0)
        );

        // The drop counter holds a slot too; free both user series.
        assert!(registry.remove_series("a", &[]));
        assert!(registry.remove_series("b", &[]));
        registry.set_gauge("c", 3.0, &[]);
        assert_eq!(registry.gather().gauge("c", &[]), Some(3.0));
    }

    #[test]
    fn test_set_gauge_if_room_skips_full_label_without_counting() {
        let registry = registry();
        registry
            .register(
                MetricDescriptor::gauge("per_client", "per client")
                    .with_labels(&["client"])
                    .with_max_label_values(1),
            )
            .unwrap();

        assert!(registry.set_gauge_if_room("per_client", 1.0, &[("client", "a")]));
        assert!(!registry.set_gauge_if_room("per_client", 1.0, &[("client", "b")]));
        assert_eq!(registry.dropped_writes(), 0.0);

        // Other refusals are still counted.
        registry.set_gauge_if_room("per_client", 1.0, &[("peer", "a")]);
        assert_eq!(registry.dropped_writes(), 1.0);
    }

    #[test]
    fn test_kind_mismatch_dropped() {
        let registry = registry();
        registry.inc_counter("ops", &[]);
        registry.set_gauge("ops", 9.0, &[]);

        let snapshot = registry.gather();
        assert_eq!(snapshot.counter("ops", &[]), Some(1.0));
        assert_eq!(
            snapshot.counter(DROPPED_WRITES, &[("reason", "kind_mismatch")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_invalid_values_dropped() {
        let registry = registry();
        registry.add_counter("ops", -1.0, &[]);
        registry.observe_histogram("lat", f64::NAN, &[]);
        registry.set_gauge("g", f64::INFINITY, &[]);
        registry.inc_counter("bad name!", &[]);

        let snapshot = registry.gather();
        assert_eq!(
            snapshot.counter(DROPPED_WRITES, &[("reason", "invalid_value")]),
            Some(3.0)
        );
        assert_eq!(
            snapshot.counter(DROPPED_WRITES, &[("reason", "invalid_name")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_register_is_idempotent_but_detects_conflicts() {
        let registry = registry();
        let descriptor = MetricDescriptor::counter("reqs", "help").with_labels(&["outcome"]);
        registry.register(descriptor.clone()).unwrap();
        registry.register(descriptor).unwrap();

        let err = registry
            .register(MetricDescriptor::gauge("reqs", "help"))
            .unwrap_err();
        assert!(matches!(err, MetricsError::Conflict { .. }));
    }

    #[test]
    fn test_bucket_validation() {
        assert!(validate_buckets("h", &[], false).is_err());
        assert!(validate_buckets("h", &[0.0, 1.0], false).is_err());
        assert!(validate_buckets("h", &[0.0, 1.0], true).is_ok());
        assert!(validate_buckets("h", &[1.0, 1.0], false).is_err());
        assert!(validate_buckets("h", &[1.0, f64::INFINITY], false).is_err());
        assert!(validate_buckets("h", &[0.1, 0.2], false).is_ok());

        let registry = registry();
        let err = registry
            .register(MetricDescriptor::histogram("h", "", &[2.0, 1.0]))
            .unwrap_err();
        assert!(matches!(err, MetricsError::InvalidBuckets { .. }));
    }

    #[test]
    fn test_gather_is_detached_copy() {
        let registry = registry();
        registry.inc_counter("ops", &[]);
        let before = registry.gather();
        registry.inc_counter("ops", &[]);

        assert_eq!(before.counter("ops", &[]), Some(1.0));
        assert_eq!(registry.gather().counter("ops", &[]), Some(2.0));
    }

    #[test]
    fn test_reset_counter() {
        let registry = registry();
        registry.add_counter("ops", 4.0, &[]);
        registry.reset_counter("ops", &[]);
        assert_eq!(registry.gather().counter("ops", &[]), Some(0.0));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let registry = registry();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        registry.inc_counter("ops", &[]);
                    }
                });
            }
        });
        assert_eq!(registry.gather().counter("ops", &[]), Some(8000.0));
    }
}
