//! LexiGate Core: request governance and metrics aggregation.
//!
//! Provides the per-client rate limiter, the metric registry every request
//! path writes to, request timers, threshold alerting over registry
//! snapshots, and the configuration consumed by the HTTP server
//! (`lexigate-server`).
//!
//! Components are constructed explicitly and shared through `Arc`; there is
//! no process-global registry.

pub mod alerts;
pub mod clock;
pub mod config;
pub mod error;
pub mod governance;
pub mod services;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::MetricsError;
pub use services::CoreServices;
