//! Metrics aggregation: registry, snapshots, exposition, request timers
//! and resource gauges.

pub mod cardinality;
pub mod exposition;
pub mod registry;
pub mod resources;
pub mod snapshot;
pub mod timers;

pub use exposition::{encode_text, exposition_name};
pub use registry::{
    DEFAULT_BUCKETS, DROPPED_WRITES, MetricDescriptor, MetricRegistry, RegistryLimits,
};
pub use resources::{ResourceMonitor, ResourceSample};
pub use snapshot::{HistogramSnapshot, MetricKind, MetricsSnapshot, SeriesSnapshot, SeriesValue};
pub use timers::{Instrumentation, Outcome, RequestTimer};
