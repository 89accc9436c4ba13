//! Threshold alerting over registry snapshots.

pub mod builtin;
pub mod evaluator;
pub mod notifier;
pub mod rule;

pub use builtin::builtin_rules;
pub use evaluator::{AlertEvaluator, AlertState, AlertStatus, SilenceError};
pub use notifier::{AlertNotifier, LogNotifier, Notification, RecordingNotifier};
pub use rule::{AlertRule, Condition, ConditionFn, Evaluation, SeriesSelector, Severity};
