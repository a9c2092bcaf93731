//! Metric capture with `metrics-util`'s debugging recorder.
//!
//! Taking a snapshot resets the recorder's counters, so tests capture one
//! [`MetricsSnapshot`] and query it as often as they need.

use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};

/// Creates a debugging recorder and snapshotter for metrics testing.
pub fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Every metric recorded up to one point in time.
#[derive(Debug)]
pub struct MetricsSnapshot(Vec<(CompositeKey, DebugValue)>);

impl MetricsSnapshot {
    /// Capture the recorder behind `snapshotter`.
    pub fn take(snapshotter: &Snapshotter) -> Self {
        Self(
            snapshotter
                .snapshot()
                .into_vec()
                .into_iter()
                .map(|(key, _, _, value)| (key, value))
                .collect(),
        )
    }

    /// Sum of every counter named `name`, across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters(|key| key.key().name() == name)
    }

    /// Counter named `name` carrying the label `label = value`.
    pub fn labelled_counter(&self, name: &str, label: &str, value: &str) -> u64 {
        self.counters(|key| {
            key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
    }

    /// Value of the gauge named `name`, if recorded.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.0.iter().find_map(|(key, value)| match value {
            DebugValue::Gauge(gauge) if key.key().name() == name => Some(gauge.into_inner()),
            _ => None,
        })
    }

    fn counters(&self, matches: impl Fn(&CompositeKey) -> bool) -> u64 {
        self.0
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(_, value)| match value {
                DebugValue::Counter(count) => *count,
                _ => 0,
            })
            .sum()
    }
}
