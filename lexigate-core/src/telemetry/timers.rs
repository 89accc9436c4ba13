//! Request-scoped timers.
//!
//! A [`RequestTimer`] is started when a request is admitted and stopped once
//! the handler produced a status. Stopping records:
//!
//! - `<operation>.duration` histogram (seconds)
//! - `<operation>.success` or `<operation>.error` counter
//! - `<operation>.last_status` gauge
//! - decrements `requests_in_flight`
//!
//! If the timer is dropped without `stop` (handler panicked or the future was
//! cancelled) it records an error and bumps `instrumentation_abandoned_timers`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use super::MetricRegistry;
use crate::clock::SharedClock;

/// Gauge of requests currently between `start` and `stop`.
pub const IN_FLIGHT: &str = "requests_in_flight";
/// Counter of `stop` calls on an already stopped timer.
pub const DOUBLE_STOP: &str = "instrumentation_double_stop";
/// Counter of timers dropped without `stop`.
pub const ABANDONED: &str = "instrumentation_abandoned_timers";

/// Result of an instrumented operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Server errors (5xx) count as failures; everything else succeeded from
    /// the service's point of view.
    pub fn from_status(status_code: u16) -> Self {
        if status_code >= 500 {
            Self::Error
        } else {
            Self::Success
        }
    }
}

/// Factory for [`RequestTimer`]s sharing one registry and clock.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    registry: Arc<MetricRegistry>,
    clock: SharedClock,
}

impl Instrumentation {
    pub fn new(registry: Arc<MetricRegistry>, clock: SharedClock) -> Self {
        Self { registry, clock }
    }

    /// Start timing `operation` and bump the in-flight gauge.
    pub fn start(&self, operation: &str) -> RequestTimer {
        self.registry.add_gauge(IN_FLIGHT, 1.0, &[]);
        RequestTimer {
            instrumentation: self.clone(),
            operation: operation.to_string(),
            start: self.clock.now(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

/// Timer for one operation. See the module docs for what it records.
#[derive(Debug)]
pub struct RequestTimer {
    instrumentation: Instrumentation,
    operation: String,
    start: Instant,
    stopped: AtomicBool,
}

impl RequestTimer {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Time since `start` according to the instrumentation clock.
    pub fn elapsed(&self) -> Duration {
        self.instrumentation
            .clock
            .now()
            .saturating_duration_since(self.start)
    }

    /// Stop the timer and record the outcome.
    ///
    /// Returns the measured duration, or `None` if the timer was already
    /// stopped. A second stop records nothing except `instrumentation_double_stop`.
    pub fn stop(&self, outcome: Outcome, status_code: u16) -> Option<Duration> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            warn!(operation = %self.operation, "Request timer stopped twice");
            self.instrumentation
                .registry
                .inc_counter(DOUBLE_STOP, &[]);
            return None;
        }
        Some(self.record(outcome, Some(status_code)))
    }

    fn record(&self, outcome: Outcome, status_code: Option<u16>) -> Duration {
        let elapsed = self.elapsed();
        let registry = &self.instrumentation.registry;
        let op = &self.operation;

        registry.observe_histogram(&format!("{op}.duration"), elapsed.as_secs_f64(), &[]);
        registry.inc_counter(&format!("{op}.{}", outcome.as_str()), &[]);
        if let Some(status) = status_code {
            registry.set_gauge(&format!("{op}.last_status"), f64::from(status), &[]);
        }
        registry.add_gauge(IN_FLIGHT, -1.0, &[]);
        elapsed
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.record(Outcome::Error, None);
            self.instrumentation.registry.inc_counter(ABANDONED, &[]);
        }
    }
}
