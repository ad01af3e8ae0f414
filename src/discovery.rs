//! Home-Assistant-style MQTT discovery payloads. Behavior here is out of
//! scope (spec §1); only the interface the outbound worker publishes at
//! startup is implemented (spec §4.9).

use serde_json::{json, Value};

use crate::config::{BatteryGroupConfig, PublishersConfig, TopicsConfig};
use crate::outbound::OutboundMessage;

fn device_block(prefix: &str) -> Value {
    json!({
        "identifiers": [prefix],
        "name": "Home Energy Arbiter",
        "manufacturer": "home-energy-arbiter",
    })
}

/// One discovery message per inverter switch, registering it as a
/// Home-Assistant `switch` entity.
pub fn inverter_switch_messages(topics: &TopicsConfig, groups: &[BatteryGroupConfig]) -> Vec<OutboundMessage> {
    let mut out = Vec::new();
    for group in groups {
        for inverter in &group.inverters {
            let unique_id = inverter.entity_id.replace('.', "_");
            let config_topic = format!("{}/switch/{}/config", topics.prefix, unique_id);
            let payload = json!({
                "name": inverter.entity_id,
                "unique_id": unique_id,
                "state_topic": inverter.state_topic,
                "command_topic": topics.service_call_topic,
                "device": device_block(&topics.prefix),
            });
            out.push(OutboundMessage::Discovery { topic: config_topic, payload });
        }
    }
    out
}

/// One discovery message for a derived-publisher sensor (e.g. the dump-load
/// mode select, a battery's calibration-reference attributes topic).
pub fn sensor_message(
    topics: &TopicsConfig,
    unique_id: &str,
    name: &str,
    state_topic: &str,
    component: &str,
) -> OutboundMessage {
    let config_topic = format!("{}/{}/{}/config", topics.prefix, component, unique_id);
    let payload = json!({
        "name": name,
        "unique_id": unique_id,
        "state_topic": state_topic,
        "device": device_block(&topics.prefix),
    });
    OutboundMessage::Discovery { topic: config_topic, payload }
}

/// One discovery message per derived-publisher sensor: each battery's
/// available-energy and low-voltage-trip topics, its calibration-reference
/// attributes, and the shared dump-load-mode select.
pub fn derived_publisher_messages(
    topics: &TopicsConfig,
    groups: &[BatteryGroupConfig],
    publishers: &PublishersConfig,
) -> Vec<OutboundMessage> {
    let mut out = Vec::new();
    for group in groups {
        out.push(sensor_message(
            topics,
            &format!("{}_available_energy", group.short_name.to_lowercase()),
            &format!("{} Available Energy", group.short_name),
            &group.available_energy_topic,
            "sensor",
        ));
        out.push(sensor_message(
            topics,
            &format!("{}_low_voltage_trip", group.short_name.to_lowercase()),
            &format!("{} Low Voltage Trip", group.short_name),
            &group.low_voltage_trip_topic,
            "binary_sensor",
        ));
        out.push(sensor_message(
            topics,
            &format!("{}_calibration_reference", group.short_name.to_lowercase()),
            &format!("{} Calibration Reference", group.short_name),
            &group.calibration_reference_topic,
            "sensor",
        ));
    }
    out.push(sensor_message(
        topics,
        "dump_load_mode",
        "Dump Load Mode",
        &publishers.dump_load_mode_topic,
        "sensor",
    ));
    out
}
