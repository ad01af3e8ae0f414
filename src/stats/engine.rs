//! The statistics engine: ingests loosely-typed, irregularly-timed
//! messages and maintains a per-second snapshot of current values plus a
//! registered set of time-weighted percentiles.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::{ExpectedTopicsConfig, PercentileRegistryConfig, SelfPublishedKind};
use crate::error::StatsError;

use super::reading::{Reading, ReadingBuffer, Topic, TopicValue};
use super::snapshot::{PercentileKey, Snapshot};

const SELF_PUBLISH_GRACE: Duration = Duration::from_secs(20);
const READINESS_LOG_INTERVAL: Duration = Duration::from_secs(30);

pub struct StatisticsEngine {
    conversion_topics: HashSet<Topic>,
    expected_topics: HashSet<Topic>,
    self_published: Vec<(Topic, SelfPublishedKind)>,
    registry: Vec<(Topic, u8, Duration)>,

    values: HashMap<Topic, TopicValue>,
    buffers: HashMap<Topic, ReadingBuffer>,
    seen: HashSet<Topic>,

    started_at: Instant,
    self_published_initialized: bool,
    last_readiness_log: Option<Instant>,
}

impl StatisticsEngine {
    pub fn new(
        expected: &ExpectedTopicsConfig,
        registry: &PercentileRegistryConfig,
        conversion_topics: impl IntoIterator<Item = Topic>,
        started_at: Instant,
    ) -> Self {
        Self {
            conversion_topics: conversion_topics.into_iter().collect(),
            expected_topics: expected.expected.iter().cloned().collect(),
            self_published: expected
                .self_published
                .iter()
                .map(|s| (s.topic.clone(), s.kind))
                .collect(),
            registry: registry
                .entries
                .iter()
                .map(|e| (e.topic.clone(), e.percentile, Duration::from_secs(e.window_seconds)))
                .collect(),
            values: HashMap::new(),
            buffers: HashMap::new(),
            seen: HashSet::new(),
            started_at,
            self_published_initialized: false,
            last_readiness_log: None,
        }
    }

    /// Ingest one `(topic, raw_string, now)` event per spec §4.1's
    /// contract. A type mismatch against a previously-pinned topic is
    /// fatal for the engine.
    pub fn ingest(&mut self, topic: &str, raw: &str, now: Instant) -> Result<(), StatsError> {
        self.seen.insert(topic.to_string());

        if let Ok(mut value) = raw.parse::<f64>() {
            if self.conversion_topics.contains(topic) {
                value *= 1000.0;
            }
            self.pin_and_check(topic, TopicValue::Float(value), raw)?;
            self.buffers
                .entry(topic.to_string())
                .or_default()
                .push(Reading { value, timestamp: now });
            return Ok(());
        }

        let folded = raw.to_ascii_lowercase();
        if folded == "on" || folded == "off" {
            self.pin_and_check(topic, TopicValue::Bool(folded == "on"), raw)?;
            return Ok(());
        }

        self.pin_and_check(topic, TopicValue::String(raw.to_string()), raw)?;
        Ok(())
    }

    fn pin_and_check(&mut self, topic: &str, value: TopicValue, raw: &str) -> Result<(), StatsError> {
        if let Some(existing) = self.values.get(topic) {
            if existing.kind() != value.kind() {
                return Err(StatsError::TopicTypeConflict {
                    topic: topic.to_string(),
                    first_kind: existing.kind(),
                    new_kind: value.kind(),
                    raw: raw.to_string(),
                });
            }
        }
        self.values.insert(topic.to_string(), value);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.expected_topics.iter().all(|t| self.seen.contains(t))
    }

    fn missing_expected(&self) -> Vec<&Topic> {
        self.expected_topics.iter().filter(|t| !self.seen.contains(*t)).collect()
    }

    /// After the startup grace period, seed any still-unseen self-published
    /// topic with its synthetic default so the controller can make
    /// progress without the dashboard having pre-populated retained
    /// messages. Runs once.
    pub fn maybe_initialize_self_published(&mut self, now: Instant) {
        if self.self_published_initialized {
            return;
        }
        if now.duration_since(self.started_at) < SELF_PUBLISH_GRACE {
            return;
        }
        self.self_published_initialized = true;
        for (topic, kind) in self.self_published.clone() {
            if self.seen.contains(&topic) {
                continue;
            }
            let default = match kind {
                SelfPublishedKind::Float => TopicValue::Float(0.0),
                SelfPublishedKind::Bool => TopicValue::Bool(true),
            };
            warn!(topic = %topic, "self-publishing default value, never observed from dashboard");
            self.values.insert(topic.clone(), default);
            self.seen.insert(topic);
        }
    }

    /// Logs the set of still-missing expected topics at most once every 30
    /// seconds. No-op while the engine is already ready.
    pub fn log_readiness_if_due(&mut self, now: Instant) {
        if self.is_ready() {
            return;
        }
        if let Some(last) = self.last_readiness_log {
            if now.duration_since(last) < READINESS_LOG_INTERVAL {
                return;
            }
        }
        self.last_readiness_log = Some(now);
        let missing: Vec<&str> = self.missing_expected().into_iter().map(String::as_str).collect();
        warn!(?missing, "statistics engine still waiting on expected topics");
    }

    /// Discard stale readings across every buffer.
    pub fn cleanup(&mut self, now: Instant) {
        for buffer in self.buffers.values_mut() {
            buffer.cleanup(now);
        }
    }

    /// Produce a `Snapshot` if the engine is ready. Returns `None`
    /// otherwise (caller should not emit before readiness).
    pub fn snapshot(&self, now: Instant) -> Option<Snapshot> {
        if !self.is_ready() {
            return None;
        }
        Some(Snapshot {
            topic_values: self.values.clone(),
            percentiles: self.compute_percentiles(now),
        })
    }

    fn compute_percentiles(&self, now: Instant) -> HashMap<PercentileKey, f64> {
        let mut by_topic_window: HashMap<(&str, Duration), Vec<u8>> = HashMap::new();
        for (topic, percentile, window) in &self.registry {
            by_topic_window.entry((topic.as_str(), *window)).or_default().push(*percentile);
        }

        let mut out = HashMap::new();
        for ((topic, window), percentiles) in by_topic_window {
            let Some(buffer) = self.buffers.get(topic) else {
                continue;
            };
            let within: Vec<Reading> = buffer.within(now, window).collect();

            if within.len() <= 1 {
                if let Some(last) = buffer.last() {
                    for p in percentiles {
                        out.insert(PercentileKey::new(topic, p, window), last.value);
                    }
                }
                continue;
            }

            let mut pairs = time_weighted_pairs(&within, now);
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            let total: Duration = pairs.iter().map(|(_, d)| *d).sum();

            for p in percentiles {
                let threshold = total.mul_f64(p as f64 / 100.0);
                let mut cumulative = Duration::ZERO;
                let mut value = pairs.last().map(|(v, _)| *v).unwrap_or(0.0);
                for (v, d) in &pairs {
                    cumulative += *d;
                    if cumulative >= threshold {
                        value = *v;
                        break;
                    }
                }
                out.insert(PercentileKey::new(topic, p, window), value);
            }
        }
        out
    }
}

/// Each reading contributes the interval from its own timestamp to the
/// next reading's timestamp; the final reading contributes from its
/// timestamp to `now`.
fn time_weighted_pairs(readings: &[Reading], now: Instant) -> Vec<(f64, Duration)> {
    let mut pairs = Vec::with_capacity(readings.len());
    for i in 0..readings.len() {
        let duration = if i + 1 < readings.len() {
            readings[i + 1].timestamp.duration_since(readings[i].timestamp)
        } else {
            now.saturating_duration_since(readings[i].timestamp)
        };
        pairs.push((readings[i].value, duration));
    }
    pairs
}
