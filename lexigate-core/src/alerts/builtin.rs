//! Built-in alert rules and their configuration overrides.
//!
//! | Rule | Condition | Default |
//! |------|-----------|---------|
//! | `HighRejectRate` | rejected / all limiter decisions | > 0.5 |
//! | `HighErrorRate` | 5xx / all completed requests | > 0.05 |
//! | `SlowResponses` | mean request latency (s) | > 0.5 |
//! | `DroppedMetricWrites` | new refused metric writes | > 0 |
//!
//! Every rule looks at the interval since the previous evaluation, so a
//! long healthy history neither hides a fresh problem nor keeps a resolved
//! one firing. Ratios and means need [`MIN_SAMPLES`] requests within the
//! interval before they can fire.

use std::collections::BTreeMap;

use super::rule::{AlertRule, Condition, SeriesSelector, Severity};
use crate::config::AlertRuleConfig;
use crate::governance::hooks::{HTTP_DURATION, HTTP_REQUESTS};
use crate::governance::rate_limiter::REQUESTS;
use crate::telemetry::DROPPED_WRITES;

pub const HIGH_REJECT_RATE: &str = "HighRejectRate";
pub const HIGH_ERROR_RATE: &str = "HighErrorRate";
pub const SLOW_RESPONSES: &str = "SlowResponses";
pub const DROPPED_METRIC_WRITES: &str = "DroppedMetricWrites";

/// Names accepted under `alerts:` in the config file.
pub const RULE_NAMES: [&str; 4] = [
    HIGH_REJECT_RATE,
    HIGH_ERROR_RATE,
    SLOW_RESPONSES,
    DROPPED_METRIC_WRITES,
];

/// Requests per interval needed before ratio and latency rules are evaluated.
pub const MIN_SAMPLES: u64 = 10;

/// Built-in rules with `overrides` applied. Disabled rules are left out.
pub fn builtin_rules(overrides: &BTreeMap<String, AlertRuleConfig>) -> Vec<AlertRule> {
    RULE_NAMES
        .iter()
        .filter_map(|name| {
            let config = overrides.get(*name).cloned().unwrap_or_default();
            config.enabled.then(|| build(name, &config))
        })
        .collect()
}

fn build(name: &str, config: &AlertRuleConfig) -> AlertRule {
    let (default_threshold, default_severity) = match name {
        HIGH_REJECT_RATE => (0.5, Severity::Warning),
        HIGH_ERROR_RATE => (0.05, Severity::Warning),
        SLOW_RESPONSES => (0.5, Severity::Warning),
        _ => (0.0, Severity::Info),
    };
    let threshold = config.threshold.unwrap_or(default_threshold);
    let severity = config.severity.unwrap_or(default_severity);

    let condition = match name {
        HIGH_REJECT_RATE => Condition::RatioAbove {
            numerator: SeriesSelector::new(REQUESTS).with_label("outcome", "rejected"),
            denominator: SeriesSelector::new(REQUESTS),
            threshold,
            min_samples: MIN_SAMPLES,
        },
        HIGH_ERROR_RATE => Condition::RatioAbove {
            numerator: SeriesSelector::new(HTTP_REQUESTS).with_label("outcome", "error"),
            denominator: SeriesSelector::new(HTTP_REQUESTS),
            threshold,
            min_samples: MIN_SAMPLES,
        },
        SLOW_RESPONSES => Condition::MeanAbove {
            histogram: SeriesSelector::new(HTTP_DURATION),
            threshold,
            min_samples: MIN_SAMPLES,
        },
        _ => Condition::IncreaseAbove {
            selector: SeriesSelector::new(DROPPED_WRITES),
            threshold,
        },
    };

    let rule = AlertRule::new(name, severity, condition);
    match config.min_re_notify_interval {
        Some(interval) => rule.with_min_renotify_interval(interval),
        None => rule,
    }
}
