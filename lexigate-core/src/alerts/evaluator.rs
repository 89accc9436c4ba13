//! Alert evaluation.
//!
//! Each rule is either Pending or Firing. An evaluation takes one registry
//! snapshot and checks every rule over the interval since the previous
//! evaluation's snapshot (since start for the first one), then applies the
//! transitions:
//!
//! - Pending → Firing: notify immediately.
//! - Firing → Firing: notify again once `min_renotify_interval` has passed
//!   since the last notification.
//! - Firing → Pending: no notification.
//!
//! Silenced rules still change state but do not notify until the silence
//! ends.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::notifier::{AlertNotifier, Notification};
use super::rule::{AlertRule, Evaluation, Severity};
use crate::clock::SharedClock;
use crate::config::ConfigError;
use crate::telemetry::{MetricDescriptor, MetricRegistry, MetricsSnapshot};

/// Gauge, 1 while a rule fires, labelled by `alert`.
pub const ALERT_FIRING: &str = "alert_firing";
/// Counter of notifications sent, labelled by `alert`.
pub const ALERT_NOTIFICATIONS: &str = "alert_notifications";
/// Counter of condition panics, labelled by `alert`.
pub const ALERT_EVALUATION_ERRORS: &str = "alert_evaluation_errors";

/// Mutable per-rule record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertState {
    pub firing: bool,
    pub last_transition: Option<Instant>,
    pub last_notified: Option<Instant>,
    pub silenced_until: Option<Instant>,
}

impl AlertState {
    fn silenced(&self, now: Instant) -> bool {
        self.silenced_until.is_some_and(|until| now < until)
    }
}

/// Why a silence could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SilenceError {
    #[error("unknown alert '{name}'")]
    UnknownRule { name: String },

    #[error("silence of {duration:?} is too long")]
    TooLong { duration: Duration },
}

/// Serializable view of one rule, as served by the admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertStatus {
    pub name: String,
    pub severity: Severity,
    pub state: &'static str,
    /// Seconds since the last Pending/Firing transition.
    pub since_secs: Option<f64>,
    pub last_notified_secs_ago: Option<f64>,
    pub silenced: bool,
    pub min_renotify_interval_secs: f64,
}

/// Evaluates a fixed rule set against registry snapshots.
#[derive(Debug)]
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    states: Mutex<Vec<AlertState>>,
    /// Snapshot taken by the previous evaluation.
    baseline: Mutex<MetricsSnapshot>,
    registry: Arc<MetricRegistry>,
    clock: SharedClock,
    notifier: Arc<dyn AlertNotifier>,
}

impl AlertEvaluator {
    /// Build an evaluator. Rule names must be unique.
    pub fn new(
        rules: Vec<AlertRule>,
        registry: Arc<MetricRegistry>,
        clock: SharedClock,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(ConfigError::DuplicateAlertRule {
                    name: rule.name.clone(),
                });
            }
        }

        let max = rules.len().max(1);
        registry.register(
            MetricDescriptor::gauge(ALERT_FIRING, "1 while the alert is firing")
                .with_labels(&["alert"])
                .with_max_label_values(max),
        )?;
        registry.register(
            MetricDescriptor::counter(ALERT_NOTIFICATIONS, "Alert notifications sent")
                .with_labels(&["alert"])
                .with_max_label_values(max),
        )?;
        registry.register(
            MetricDescriptor::counter(ALERT_EVALUATION_ERRORS, "Alert conditions that panicked")
                .with_labels(&["alert"])
                .with_max_label_values(max),
        )?;

        info!(rules = rules.len(), "Alert evaluator configured");
        let states = Mutex::new(vec![AlertState::default(); rules.len()]);
        Ok(Self {
            rules,
            states,
            baseline: Mutex::new(MetricsSnapshot::default()),
            registry,
            clock,
            notifier,
        })
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Run one evaluation pass and return the notifications it emitted.
    pub fn evaluate(&self) -> Vec<Notification> {
        let snapshot = self.registry.gather();
        let now = self.clock.now();
        let previous = std::mem::replace(&mut *self.baseline.lock(), snapshot.clone());

        let results: Vec<Option<Evaluation>> = self
            .rules
            .iter()
            .map(|rule| {
                catch_unwind(AssertUnwindSafe(|| {
                    rule.condition.evaluate(&snapshot, &previous)
                }))
                .ok()
            })
            .collect();

        let mut notifications = Vec::new();
        let mut firing = Vec::with_capacity(self.rules.len());
        {
            let mut states = self.states.lock();
            for ((rule, state), result) in self.rules.iter().zip(states.iter_mut()).zip(&results) {
                let evaluation = result.unwrap_or(Evaluation {
                    met: false,
                    value: None,
                });
                if let Some(notification) = transition(rule, state, evaluation, now) {
                    notifications.push(notification);
                }
                firing.push(state.firing);
            }
        }

        for ((rule, result), is_firing) in self.rules.iter().zip(&results).zip(&firing) {
            let labels = [("alert", rule.name.as_str())];
            if result.is_none() {
                warn!(alert = %rule.name, "Alert condition panicked, treating as not firing");
                self.registry.inc_counter(ALERT_EVALUATION_ERRORS, &labels);
            }
            self.registry
                .set_gauge(ALERT_FIRING, if *is_firing { 1.0 } else { 0.0 }, &labels);
        }
        for notification in &notifications {
            self.registry
                .inc_counter(ALERT_NOTIFICATIONS, &[("alert", notification.rule.as_str())]);
            self.notifier.notify(notification);
        }
        notifications
    }

    /// Suppress notifications for `rule` until `until`. Returns `false` for
    /// an unknown rule.
    pub fn silence(&self, rule: &str, until: Instant) -> bool {
        let Some(index) = self.index_of(rule) else {
            return false;
        };
        self.states.lock()[index].silenced_until = Some(until);
        info!(alert = rule, "Alert silenced");
        true
    }

    /// Silence `rule` for `duration` from now.
    ///
    /// Fails with [`SilenceError::TooLong`] when the end of the silence is
    /// not representable.
    pub fn silence_for(&self, rule: &str, duration: Duration) -> Result<(), SilenceError> {
        let until = self
            .clock
            .now()
            .checked_add(duration)
            .ok_or(SilenceError::TooLong { duration })?;
        if self.silence(rule, until) {
            Ok(())
        } else {
            Err(SilenceError::UnknownRule {
                name: rule.to_string(),
            })
        }
    }

    /// Lift a silence early.
    pub fn unsilence(&self, rule: &str) -> bool {
        let Some(index) = self.index_of(rule) else {
            return false;
        };
        self.states.lock()[index].silenced_until = None;
        true
    }

    /// Current state of `rule`.
    pub fn state(&self, rule: &str) -> Option<AlertState> {
        let index = self.index_of(rule)?;
        Some(self.states.lock()[index])
    }

    /// Status of every rule, in registration order.
    pub fn statuses(&self) -> Vec<AlertStatus> {
        let now = self.clock.now();
        let states = self.states.lock().clone();
        let secs_since = |t: Option<Instant>| t.map(|t| now.saturating_duration_since(t).as_secs_f64());
        self.rules
            .iter()
            .zip(states)
            .map(|(rule, state)| AlertStatus {
                name: rule.name.clone(),
                severity: rule.severity,
                state: if state.firing { "firing" } else { "pending" },
                since_secs: secs_since(state.last_transition),
                last_notified_secs_ago: secs_since(state.last_notified),
                silenced: state.silenced(now),
                min_renotify_interval_secs: rule.min_renotify_interval.as_secs_f64(),
            })
            .collect()
    }

    /// Spawn periodic evaluation. The task stops between ticks once
    /// `shutdown` is cancelled, never mid-evaluation.
    pub fn spawn(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let evaluator = Arc::clone(self);
        // tokio::time::interval panics on a zero period.
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await; // first tick is immediate
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let sent = evaluator.evaluate();
                        debug!(notifications = sent.len(), "Alert evaluation complete");
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Alert evaluator shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn index_of(&self, rule: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.name == rule)
    }
}

/// Apply one evaluation to a rule's state.
fn transition(
    rule: &AlertRule,
    state: &mut AlertState,
    evaluation: Evaluation,
    now: Instant,
) -> Option<Notification> {
    let repeat = match (state.firing, evaluation.met) {
        (false, false) => return None,
        (true, false) => {
            state.firing = false;
            state.last_transition = Some(now);
            info!(alert = %rule.name, "Alert resolved");
            return None;
        }
        (false, true) => {
            state.firing = true;
            state.last_transition = Some(now);
            false
        }
        (true, true) => {
            let due = state
                .last_notified
                .is_none_or(|at| now.saturating_duration_since(at) >= rule.min_renotify_interval);
            if !due {
                return None;
            }
            true
        }
    };

    if state.silenced(now) {
        return None;
    }
    state.last_notified = Some(now);
    Some(Notification {
        rule: rule.name.clone(),
        severity: rule.severity,
        value: evaluation.value,
        repeat,
    })
}
