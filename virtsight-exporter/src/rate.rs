//! Rollover-aware derivative of cumulative counters.

use std::collections::HashMap;

/// Per-series derivative calculator.
///
/// Remembers the last cumulative value of every series it has seen and turns
/// the next value into a per-second rate. State is never dropped: one entry
/// per series for the lifetime of the tracker.
///
/// [`derive`](Self::derive) must be called exactly once per series per
/// cycle; a second call would see the value it just stored and report a
/// rate of (almost) zero.
#[derive(Debug, Default)]
pub struct RateTracker {
    last_values: HashMap<String, f64>,
    allow_negative: bool,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report negative rates instead of clamping them to zero.
    pub fn allow_negative(mut self, allow: bool) -> Self {
        self.allow_negative = allow;
        self
    }

    /// Record `value` for `series` and return its rate over `interval_secs`.
    ///
    /// - first sighting of a series: 0
    /// - value lower than the previous one (counter reset): 0
    /// - `interval_secs` not a positive finite number: 0
    ///
    /// The value is stored in every case.
    ///
    /// The delta is always divided by `interval_secs`, not by the time since
    /// the stored value was taken. If a series skips a cycle (for example a
    /// failed `cpu_stats` call), the next rate covers two intervals' worth of
    /// growth and reads about twice the real usage.
    pub fn derive(&mut self, series: &str, value: f64, interval_secs: f64) -> f64 {
        let previous = self.last_values.insert(series.to_string(), value);

        let Some(old) = previous else {
            return 0.0;
        };

        if value < old {
            return 0.0;
        }

        if !(interval_secs.is_finite() && interval_secs > 0.0) {
            return 0.0;
        }

        let rate = (value - old) / interval_secs;
        if !rate.is_finite() || (rate < 0.0 && !self.allow_negative) {
            return 0.0;
        }
        rate
    }

    /// Last recorded value of a series.
    pub fn last_value(&self, series: &str) -> Option<f64> {
        self.last_values.get(series).copied()
    }

    /// Number of series ever seen.
    pub fn len(&self) -> usize {
        self.last_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_values.is_empty()
    }
}
