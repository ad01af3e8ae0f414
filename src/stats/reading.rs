//! The raw reading model: a tagged value pinned to one type on first
//! arrival, and a bounded per-topic history of numeric readings.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

pub type Topic = String;

/// The retention window for numeric reading buffers (spec §3/§4.1).
pub const RETENTION: Duration = Duration::from_secs(15 * 60);

/// A single numeric observation. Immutable once appended to a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub value: f64,
    pub timestamp: Instant,
}

/// A topic's current value, tagged with the type it was first observed as.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum TopicValue {
    Float(f64),
    Bool(bool),
    String(String),
}

impl TopicValue {
    pub fn kind(&self) -> &'static str {
        match self {
            TopicValue::Float(_) => "float",
            TopicValue::Bool(_) => "bool",
            TopicValue::String(_) => "string",
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TopicValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TopicValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Ordered history of readings for one numeric topic. Invariant:
/// timestamps are non-decreasing (guaranteed by the single-threaded
/// ingestion worker processing its channel in FIFO order), and at least
/// one reading is always retained so "last known value" survives a quiet
/// window.
#[derive(Debug, Clone, Default)]
pub struct ReadingBuffer {
    readings: VecDeque<Reading>,
}

impl ReadingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reading: Reading) {
        debug_assert!(
            self.readings.back().map_or(true, |r| r.timestamp <= reading.timestamp),
            "reading timestamps must be non-decreasing"
        );
        self.readings.push_back(reading);
    }

    /// Discard readings older than `RETENTION`, always keeping the newest
    /// even if it is itself stale.
    pub fn cleanup(&mut self, now: Instant) {
        let cutoff = now.checked_sub(RETENTION).unwrap_or(now);
        while self.readings.len() > 1 {
            let Some(front) = self.readings.front() else {
                break;
            };
            if front.timestamp < cutoff {
                self.readings.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn last(&self) -> Option<Reading> {
        self.readings.back().copied()
    }

    /// Readings with timestamp strictly after `now - window`.
    pub fn within(&self, now: Instant, window: Duration) -> impl Iterator<Item = Reading> + '_ {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.readings.iter().copied().filter(move |r| r.timestamp > cutoff)
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }
}
