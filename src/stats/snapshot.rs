//! The immutable output of the statistics engine: a per-second snapshot of
//! current topic values plus the registered percentiles.

use std::collections::HashMap;
use std::time::Duration;

use super::reading::{Topic, TopicValue};

/// `(topic, percentile, window)`. The set the engine maintains is static
/// configuration; anything not registered here only gets a `Current`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PercentileKey {
    pub topic: Topic,
    pub percentile: u8,
    pub window: Duration,
}

impl PercentileKey {
    pub fn new(topic: impl Into<Topic>, percentile: u8, window: Duration) -> Self {
        Self {
            topic: topic.into(),
            percentile,
            window,
        }
    }
}

/// Deep-cloned, immutable per-tick view of the world. Every consumer reads
/// state exclusively through a `Snapshot` — none may cache values across
/// ticks, since external actors can change switches between snapshots.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub topic_values: HashMap<Topic, TopicValue>,
    pub percentiles: HashMap<PercentileKey, f64>,
}

impl Snapshot {
    pub fn get(&self, topic: &str) -> Option<&TopicValue> {
        self.topic_values.get(topic)
    }

    pub fn get_float(&self, topic: &str) -> Option<f64> {
        self.get(topic).and_then(TopicValue::as_float)
    }

    pub fn get_bool(&self, topic: &str) -> Option<bool> {
        self.get(topic).and_then(TopicValue::as_bool)
    }

    pub fn get_string(&self, topic: &str) -> Option<&str> {
        match self.get(topic) {
            Some(TopicValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn percentile(&self, topic: &str, percentile: u8, window: Duration) -> Option<f64> {
        self.percentiles.get(&PercentileKey::new(topic, percentile, window)).copied()
    }
}
