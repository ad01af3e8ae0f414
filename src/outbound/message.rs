//! The three classes of outbound message (spec §6).

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Retained, QoS 2, topic ends in `/config`. Always emitted regardless
    /// of the enabled flag.
    Discovery { topic: String, payload: Value },

    /// Not retained, QoS 0-1. A state publication such as SOC JSON or a
    /// scalar debug sensor value.
    State { topic: String, payload: String, retain: bool },

    /// Published to the fixed proxy topic, QoS 1, not retained.
    ServiceCall {
        domain: String,
        service: String,
        entity_id: Option<String>,
        data: Option<Value>,
    },
}

impl OutboundMessage {
    pub fn is_discovery(&self) -> bool {
        matches!(self, OutboundMessage::Discovery { .. })
    }

    /// The topic this message publishes to, given the fixed service-call
    /// proxy topic from configuration.
    pub fn topic(&self, service_call_topic: &str) -> String {
        match self {
            OutboundMessage::Discovery { topic, .. } => topic.clone(),
            OutboundMessage::State { topic, .. } => topic.clone(),
            OutboundMessage::ServiceCall { .. } => service_call_topic.to_string(),
        }
    }

    pub fn retained(&self) -> bool {
        match self {
            OutboundMessage::Discovery { .. } => true,
            OutboundMessage::State { retain, .. } => *retain,
            OutboundMessage::ServiceCall { .. } => false,
        }
    }

    pub fn body(&self) -> String {
        match self {
            OutboundMessage::Discovery { payload, .. } => payload.to_string(),
            OutboundMessage::State { payload, .. } => payload.clone(),
            OutboundMessage::ServiceCall { domain, service, entity_id, data } => {
                serde_json::json!({
                    "domain": domain,
                    "service": service,
                    "entity_id": entity_id,
                    "data": data,
                })
                .to_string()
            }
        }
    }
}

/// Convenience constructor for the inverter on/off service calls the
/// arbitration engine issues.
pub fn switch_service_call(entity_id: &str, turn_on: bool) -> OutboundMessage {
    OutboundMessage::ServiceCall {
        domain: "switch".to_string(),
        service: if turn_on { "turn_on".to_string() } else { "turn_off".to_string() },
        entity_id: Some(entity_id.to_string()),
        data: None,
    }
}
