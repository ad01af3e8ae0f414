//! Topic-shape recognition and payload sanitization at the transport
//! boundary (spec §6).

/// The recognised Home-Assistant-style topic shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicShape {
    Sensor,
    Switch,
    Select,
    Discovery,
}

/// Classify a topic by its trailing segment. Returns `None` for anything
/// that doesn't match a recognised shape; callers should still forward
/// unrecognised topics (the registry, not the shape, decides relevance).
pub fn classify(topic: &str) -> Option<TopicShape> {
    if topic.ends_with("/config") {
        return Some(TopicShape::Discovery);
    }
    if topic.ends_with("/state") {
        if topic.contains("/sensor/") {
            return Some(TopicShape::Sensor);
        }
        if topic.contains("/switch/") {
            return Some(TopicShape::Switch);
        }
        if topic.contains("/select/") {
            return Some(TopicShape::Select);
        }
    }
    None
}

const INVALID_VALUES: [&str; 2] = ["undefined", "unavailable"];

/// Payloads are treated as case-folded UTF-8 text; a literal "Undefined" or
/// "unavailable" (in any case) carries no information and must never reach
/// the statistics engine, where it would otherwise pin a topic's type to
/// `String`.
pub fn is_invalid_payload(raw: &str) -> bool {
    let folded = raw.trim().to_lowercase();
    INVALID_VALUES.contains(&folded.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sensor_switch_select_and_discovery_topics() {
        assert_eq!(classify("oec/sensor/b2_soc/state"), Some(TopicShape::Sensor));
        assert_eq!(classify("oec/switch/b2_inverter_1/state"), Some(TopicShape::Switch));
        assert_eq!(classify("oec/select/dump_load_mode/state"), Some(TopicShape::Select));
        assert_eq!(classify("oec/switch/b2_inverter_1/config"), Some(TopicShape::Discovery));
    }

    #[test]
    fn unrecognised_shapes_return_none() {
        assert_eq!(classify("oec/sensor/b2_soc/attributes"), None);
    }

    #[test]
    fn invalid_payloads_are_case_and_whitespace_insensitive() {
        assert!(is_invalid_payload("Undefined"));
        assert!(is_invalid_payload(" unavailable \n"));
        assert!(is_invalid_payload("UNAVAILABLE"));
        assert!(!is_invalid_payload("42.3"));
    }
}
