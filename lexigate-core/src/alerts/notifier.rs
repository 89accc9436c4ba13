//! Alert notification sinks.

use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::warn;

use super::rule::Severity;

/// One "should notify" signal emitted by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub rule: String,
    pub severity: Severity,
    /// Observed value when the condition reports one.
    pub value: Option<f64>,
    /// `false` for the Pending→Firing notification, `true` for reminders.
    pub repeat: bool,
}

/// Receives notifications. Implementations must not block for long: they
/// run on the evaluation task.
pub trait AlertNotifier: Send + Sync + Debug {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        warn!(
            alert = %notification.rule,
            severity = %notification.severity,
            value = notification.value,
            repeat = notification.repeat,
            "Alert firing"
        );
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    /// Drain received notifications.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.received.lock())
    }

    pub fn count_for(&self, rule: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|n| n.rule == rule)
            .count()
    }
}

impl AlertNotifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.received.lock().push(notification.clone());
    }
}
