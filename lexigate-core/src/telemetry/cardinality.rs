//! Cardinality guard for metric labels.
//!
//! Each declared label key of a metric owns one [`CardinalityGuard`]. A label
//! value is counted once per live series that carries it, so removing the
//! last series for a value frees its slot again.

use std::collections::HashMap;

/// Bounds the number of distinct values a single label key may take.
///
/// Unlike a folding limiter, values beyond the ceiling are refused outright;
/// the caller drops the write and counts it.
#[derive(Debug, Clone)]
pub struct CardinalityGuard {
    live: HashMap<String, usize>,
    max_values: usize,
}

impl CardinalityGuard {
    /// Create a guard allowing at most `max_values` distinct values.
    pub fn new(max_values: usize) -> Self {
        Self {
            live: HashMap::new(),
            max_values,
        }
    }

    /// Whether `value` may be used by a new series.
    ///
    /// Known values are always admitted. Unknown values are admitted while
    /// the distinct count is below the ceiling.
    pub fn admits(&self, value: &str) -> bool {
        self.live.contains_key(value) || self.live.len() < self.max_values
    }

    /// Record one more live series carrying `value`.
    pub fn retain(&mut self, value: &str) {
        *self.live.entry(value.to_string()).or_insert(0) += 1;
    }

    /// Record that a series carrying `value` was removed.
    pub fn release(&mut self, value: &str) {
        if let Some(refs) = self.live.get_mut(value) {
            *refs -= 1;
            if *refs == 0 {
                self.live.remove(value);
            }
        }
    }

    /// Distinct values currently in use.
    pub fn distinct(&self) -> usize {
        self.live.len()
    }

    /// Configured ceiling.
    pub fn limit(&self) -> usize {
        self.max_values
    }
}
