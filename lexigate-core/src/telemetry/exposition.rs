//! OpenMetrics text exposition of registry snapshots.
//!
//! The registry keeps its own storage, so exposition goes through a
//! `prometheus-client` [`Collector`] that replays a [`MetricsSnapshot`] into
//! the crate's text encoder. Registry names may contain `.`; those are
//! rewritten to `_` on the way out.

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric, MetricEncoder};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;

use super::registry::MetricRegistry;
use super::snapshot::{MetricsSnapshot, SeriesSnapshot, SeriesValue};

/// Collector replaying one snapshot.
#[derive(Debug)]
struct SnapshotCollector {
    snapshot: MetricsSnapshot,
}

impl Collector for SnapshotCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        for family in self.snapshot.families() {
            let Some(first) = family.first() else {
                continue;
            };
            let name = exposition_name(&first.name);
            let help = if first.help.is_empty() {
                first.name.as_str()
            } else {
                first.help.as_str()
            };
            let metric_type = match first.value {
                SeriesValue::Counter { .. } => MetricType::Counter,
                SeriesValue::Gauge { .. } => MetricType::Gauge,
                SeriesValue::Histogram(_) => MetricType::Histogram,
            };

            let mut metric_encoder = encoder.encode_descriptor(&name, help, None, metric_type)?;

            // Unlabelled families hold exactly one series.
            if let [only] = family {
                if only.labels.is_empty() {
                    encode_value(only, metric_encoder)?;
                    continue;
                }
            }
            for series in family {
                let labels: Vec<(String, String)> = series
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                encode_value(series, metric_encoder.encode_family(&labels)?)?;
            }
        }
        Ok(())
    }
}

fn encode_value(series: &SeriesSnapshot, mut encoder: MetricEncoder) -> Result<(), std::fmt::Error> {
    match &series.value {
        SeriesValue::Counter { value } => ConstCounter::new(*value).encode(encoder),
        SeriesValue::Gauge { value } => ConstGauge::new(*value).encode(encoder),
        SeriesValue::Histogram(h) => encoder.encode_histogram::<Vec<(String, String)>>(
            h.sum,
            h.count,
            &h.bucket_counts(),
            None,
        ),
    }
}

/// Registry name → exposition name (`handler.word.get` → `handler_word_get`).
pub fn exposition_name(name: &str) -> String {
    name.replace('.', "_")
}

/// Encode a snapshot as OpenMetrics text.
pub fn encode_text(snapshot: MetricsSnapshot) -> Result<String, std::fmt::Error> {
    let mut registry = Registry::default();
    registry.register_collector(Box::new(SnapshotCollector { snapshot }));
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
    Ok(buffer)
}

impl MetricRegistry {
    /// Gather and encode in one step.
    pub fn encode_text(&self) -> Result<String, std::fmt::Error> {
        encode_text(self.gather())
    }
}
