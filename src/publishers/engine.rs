//! Fuses the four derived publishers into one per-snapshot evaluation.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::{ArbitrationTopicsConfig, BatteryGroupConfig, PublishersConfig};
use crate::outbound::OutboundMessage;
use crate::stats::Snapshot;

use super::calibration::{integrate_soc, CalibrationDetector};
use super::dump_load::DumpLoadSelector;
use super::low_voltage::LowVoltageTrip;
use super::model::PublisherBatteryGroup;

struct BatteryPublishers {
    group: PublisherBatteryGroup,
    calibration: CalibrationDetector,
    low_voltage: LowVoltageTrip,
}

pub struct PublishersEngine {
    batteries: Vec<BatteryPublishers>,
    dump_load: DumpLoadSelector,
    published_trip_status: HashMap<String, bool>,
}

impl PublishersEngine {
    pub fn new(groups: &[BatteryGroupConfig]) -> Self {
        let batteries = groups
            .iter()
            .map(|g| BatteryPublishers {
                group: PublisherBatteryGroup::from_config(g),
                calibration: CalibrationDetector::default(),
                low_voltage: LowVoltageTrip::default(),
            })
            .collect();
        Self {
            batteries,
            dump_load: DumpLoadSelector::default(),
            published_trip_status: HashMap::new(),
        }
    }

    pub fn evaluate(
        &mut self,
        snapshot: &Snapshot,
        now: Instant,
        publishers: &PublishersConfig,
        arbitration_topics: &ArbitrationTopicsConfig,
    ) -> Vec<OutboundMessage> {
        let mut out = Vec::new();

        for battery in &mut self.batteries {
            out.extend(battery.calibration.update(&battery.group, snapshot, now, publishers));

            let reference = battery.calibration.reference();
            if let Some(available_wh) = integrate_soc(&battery.group, reference, snapshot, publishers.soc_loss_rate)
            {
                out.push(OutboundMessage::State {
                    topic: battery.group.available_energy_topic.clone(),
                    payload: available_wh.to_string(),
                    retain: false,
                });
            }

            out.extend(battery.low_voltage.update(
                &battery.group,
                snapshot,
                now,
                publishers.low_voltage_trip_threshold,
                publishers.low_voltage_rearm_minutes,
            ));
        }

        out.extend(self.dump_load.update(snapshot, arbitration_topics, publishers));

        let current = self.trip_status();
        for battery in &self.batteries {
            let tripped = current[&battery.group.short_name];
            if self.published_trip_status.get(&battery.group.short_name) != Some(&tripped) {
                out.push(OutboundMessage::State {
                    topic: battery.group.low_voltage_trip_topic.clone(),
                    payload: tripped.to_string(),
                    retain: true,
                });
            }
        }
        self.published_trip_status = current;

        out
    }

    /// Battery short name -> whether its low-voltage trip is currently latched.
    pub fn trip_status(&self) -> HashMap<String, bool> {
        self.batteries
            .iter()
            .map(|b| (b.group.short_name.clone(), b.low_voltage.is_tripped()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InverterConfig;
    use crate::stats::{PercentileKey, TopicValue};
    use std::time::Duration;

    fn group() -> BatteryGroupConfig {
        BatteryGroupConfig {
            short_name: "B2".to_string(),
            inverters: vec![InverterConfig {
                entity_id: "switch.b2_inverter_1".to_string(),
                state_topic: "oec/switch/b2_inverter_1/state".to_string(),
            }],
            charge_state_topic: "charge_state".to_string(),
            soc_topic: "soc".to_string(),
            capacity_wh: 10_000.0,
            solar_multiplier: 1.0,
            available_energy_topic: "available".to_string(),
            forecast_remaining_wh_topic: "forecast_remaining".to_string(),
            forecast_periods_topic: "forecast_periods".to_string(),
            terminal_voltage_topic: "voltage".to_string(),
            net_power_topic: "net_power".to_string(),
            cumulative_inflow_kwh_topic: "inflow".to_string(),
            cumulative_outflow_kwh_topic: "outflow".to_string(),
            low_voltage_trip_topic: "low_voltage_trip".to_string(),
            calibration_reference_topic: "calibration".to_string(),
        }
    }

    fn arbitration_topics() -> ArbitrationTopicsConfig {
        ArbitrationTopicsConfig {
            grid_frequency_topic: "grid_freq".to_string(),
            grid_available_topic: "grid_available".to_string(),
            utility_battery_soc_topic: "utility_soc".to_string(),
            load_power_topic: "load".to_string(),
            current_solar_topic: "solar".to_string(),
            transfer_solar_topic: "transfer_solar".to_string(),
        }
    }

    fn publishers_config() -> PublishersConfig {
        PublishersConfig {
            calibration_high_voltage_threshold: 54.0,
            calibration_power_band_watts: 50.0,
            calibration_cooldown_secs: 2,
            calibration_nudge_kwh: 0.005,
            low_voltage_trip_threshold: 46.0,
            low_voltage_rearm_minutes: 16,
            dump_load_super_watts: 3000.0,
            dump_load_standard_watts: 1500.0,
            dump_load_eco_watts: 500.0,
            soc_loss_rate: 0.0,
            dump_load_mode_topic: "dump_load_mode".to_string(),
        }
    }

    fn snapshot_with_voltage(volts: f64) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.percentiles.insert(
            PercentileKey::new("voltage", 1, Duration::from_secs(15 * 60)),
            volts,
        );
        snap.topic_values.insert("solar".to_string(), TopicValue::Float(0.0));
        snap.topic_values.insert("load".to_string(), TopicValue::Float(0.0));
        snap
    }

    #[test]
    fn trip_status_is_published_once_on_change_and_not_repeated() {
        let mut engine = PublishersEngine::new(&[group()]);
        let publishers = publishers_config();
        let topics = arbitration_topics();
        let now = Instant::now();

        let first = engine.evaluate(&snapshot_with_voltage(44.0), now, &publishers, &topics);
        assert!(first.iter().any(|m| matches!(
            m,
            OutboundMessage::State { topic, payload, retain }
                if topic == "low_voltage_trip" && payload == "true" && *retain
        )));

        let second = engine.evaluate(&snapshot_with_voltage(44.0), now, &publishers, &topics);
        assert!(!second
            .iter()
            .any(|m| matches!(m, OutboundMessage::State { topic, .. } if topic == "low_voltage_trip")));
    }
}
