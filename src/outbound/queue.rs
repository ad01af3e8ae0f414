//! FIFO buffering and the enabled-flag filter (spec §4.5).

use std::collections::VecDeque;

use tracing::warn;

use crate::stats::Snapshot;

use super::message::OutboundMessage;

/// Design minimum capacity (spec §5).
pub const CAPACITY: usize = 100;

pub struct OutboundQueue {
    enabled_topic: String,
    force_enable: bool,
    queue: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new(enabled_topic: String, force_enable: bool) -> Self {
        Self {
            enabled_topic,
            force_enable,
            queue: VecDeque::with_capacity(CAPACITY),
        }
    }

    fn enabled(&self, snapshot: &Snapshot) -> bool {
        self.force_enable || snapshot.get_bool(&self.enabled_topic).unwrap_or(false)
    }

    /// Enqueue `message`, dropping it if the controller is disabled and it
    /// is not a discovery/config message. The discovery exemption always
    /// applies, even with `force_enable` unset, so the dashboard can
    /// register entities regardless of the remote switch.
    pub fn enqueue(&mut self, message: OutboundMessage, snapshot: &Snapshot) {
        if !message.is_discovery() && !self.enabled(snapshot) {
            return;
        }
        if self.queue.len() >= CAPACITY {
            warn!("outbound queue full, dropping oldest message");
            self.queue.pop_front();
        }
        self.queue.push_back(message);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = OutboundMessage> + '_ {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::TopicValue;

    fn snapshot_with_enabled(enabled: bool) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.topic_values.insert("enabled".to_string(), TopicValue::Bool(enabled));
        snap
    }

    #[test]
    fn discovery_messages_flow_even_when_disabled() {
        let mut queue = OutboundQueue::new("enabled".to_string(), false);
        let snap = snapshot_with_enabled(false);
        queue.enqueue(
            OutboundMessage::Discovery {
                topic: "oec/switch/b2_inv0/config".to_string(),
                payload: serde_json::json!({}),
            },
            &snap,
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn non_discovery_messages_are_dropped_when_disabled() {
        let mut queue = OutboundQueue::new("enabled".to_string(), false);
        let snap = snapshot_with_enabled(false);
        queue.enqueue(
            OutboundMessage::State { topic: "x".to_string(), payload: "1".to_string(), retain: false },
            &snap,
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn force_enable_bypasses_the_disabled_flag() {
        let mut queue = OutboundQueue::new("enabled".to_string(), true);
        let snap = snapshot_with_enabled(false);
        queue.enqueue(
            OutboundMessage::State { topic: "x".to_string(), payload: "1".to_string(), retain: false },
            &snap,
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = OutboundQueue::new("enabled".to_string(), true);
        let snap = snapshot_with_enabled(true);
        for i in 0..3 {
            queue.enqueue(
                OutboundMessage::State { topic: format!("x{i}"), payload: i.to_string(), retain: false },
                &snap,
            );
        }
        let drained: Vec<_> = queue.drain().map(|m| m.body()).collect();
        assert_eq!(drained, vec!["0", "1", "2"]);
    }
}
