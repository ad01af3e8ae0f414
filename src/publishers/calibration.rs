//! Calibration detector and the SOC integrator that depends on its
//! reference point (spec §4.4).

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::PublishersConfig;
use crate::outbound::OutboundMessage;
use crate::stats::Snapshot;

use super::model::PublisherBatteryGroup;

const FLOAT_CHARGING: &str = "Float Charging";
const SOC_DRIFT_THRESHOLD: f64 = 99.5;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CalibrationReference {
    pub inflow_kwh: f64,
    pub outflow_kwh: f64,
}

#[derive(Debug, Default)]
pub struct CalibrationDetector {
    reference: Option<CalibrationReference>,
    last_nudge: Option<Instant>,
}

impl CalibrationDetector {
    pub fn reference(&self) -> Option<CalibrationReference> {
        self.reference
    }

    pub fn update(
        &mut self,
        group: &PublisherBatteryGroup,
        snapshot: &Snapshot,
        now: Instant,
        config: &PublishersConfig,
    ) -> Vec<OutboundMessage> {
        let charge_state = snapshot.get_string(&group.charge_state_topic);
        let is_float = charge_state == Some(FLOAT_CHARGING);

        let voltage = snapshot.get_float(&group.terminal_voltage_topic);
        let net_power = snapshot.get_float(&group.net_power_topic);
        let soc = snapshot.get_float(&group.soc_topic);
        let inflow = snapshot.get_float(&group.cumulative_inflow_kwh_topic);
        let outflow = snapshot.get_float(&group.cumulative_outflow_kwh_topic);

        if let (true, Some(v), Some(p), Some(inflow), Some(outflow)) =
            (is_float, voltage, net_power, inflow, outflow)
        {
            if v >= config.calibration_high_voltage_threshold
                && p.abs() <= config.calibration_power_band_watts
            {
                let reference = CalibrationReference { inflow_kwh: inflow, outflow_kwh: outflow };
                self.reference = Some(reference);
                return vec![self.publish(group, reference)];
            }
        }

        if !is_float {
            if let Some(soc) = soc {
                if soc >= SOC_DRIFT_THRESHOLD {
                    let cooldown = Duration::from_secs(config.calibration_cooldown_secs);
                    let cooled_down = self.last_nudge.map(|at| now - at >= cooldown).unwrap_or(true);
                    if cooled_down {
                        if let Some(reference) = self.reference.as_mut() {
                            reference.outflow_kwh -= config.calibration_nudge_kwh;
                            self.last_nudge = Some(now);
                            let reference = *reference;
                            return vec![self.publish(group, reference)];
                        }
                    }
                }
            }
        }

        Vec::new()
    }

    fn publish(&self, group: &PublisherBatteryGroup, reference: CalibrationReference) -> OutboundMessage {
        OutboundMessage::State {
            topic: group.calibration_reference_topic.clone(),
            payload: serde_json::to_string(&reference).unwrap_or_default(),
            retain: true,
        }
    }
}

/// `available_wh = clamp(capacity_wh + delta_inflow_wh - delta_outflow_wh * (1 + loss_rate), 0, capacity_wh)`
/// where delta is measured against the latest calibration reference. `None`
/// until a reference point and fresh cumulative readings both exist.
pub fn integrate_soc(
    group: &PublisherBatteryGroup,
    reference: Option<CalibrationReference>,
    snapshot: &Snapshot,
    loss_rate: f64,
) -> Option<f64> {
    let reference = reference?;
    let inflow = snapshot.get_float(&group.cumulative_inflow_kwh_topic)?;
    let outflow = snapshot.get_float(&group.cumulative_outflow_kwh_topic)?;

    let delta_inflow_wh = (inflow - reference.inflow_kwh) * 1000.0;
    let delta_outflow_wh = (outflow - reference.outflow_kwh) * 1000.0;

    let available = group.capacity_wh + delta_inflow_wh - delta_outflow_wh * (1.0 + loss_rate);
    Some(available.clamp(0.0, group.capacity_wh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::TopicValue;

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
            dump_load_mode_topic: "oec/select/dump_load_mode/state".to_string(),
        }
    }

    fn group() -> PublisherBatteryGroup {
        PublisherBatteryGroup {
            short_name: "B2".to_string(),
            inverter_entity_ids: vec!["switch.b2_inverter_1".to_string()],
            charge_state_topic: "charge_state".to_string(),
            soc_topic: "soc".to_string(),
            terminal_voltage_topic: "voltage".to_string(),
            net_power_topic: "net_power".to_string(),
            cumulative_inflow_kwh_topic: "inflow".to_string(),
            cumulative_outflow_kwh_topic: "outflow".to_string(),
            calibration_reference_topic: "calibration".to_string(),
            available_energy_topic: "available".to_string(),
            low_voltage_trip_topic: "low_voltage_trip".to_string(),
            capacity_wh: 10_000.0,
        }
    }

    fn snapshot_with(entries: &[(&str, TopicValue)]) -> Snapshot {
        let mut snap = Snapshot::default();
        for (topic, value) in entries {
            snap.topic_values.insert(topic.to_string(), value.clone());
        }
        snap
    }

    #[test]
    fn float_charging_steady_state_publishes_reference() {
        let mut detector = CalibrationDetector::default();
        let group = group();
        let config = publishers_config();
        let snap = snapshot_with(&[
            ("charge_state", TopicValue::String(FLOAT_CHARGING.to_string())),
            ("voltage", TopicValue::Float(54.2)),
            ("net_power", TopicValue::Float(10.0)),
            ("inflow", TopicValue::Float(120.0)),
            ("outflow", TopicValue::Float(100.0)),
        ]);
        let messages = detector.update(&group, &snap, Instant::now(), &config);
        assert_eq!(messages.len(), 1);
        let reference = detector.reference().unwrap();
        assert_eq!(reference.inflow_kwh, 120.0);
        assert_eq!(reference.outflow_kwh, 100.0);
    }

    #[test]
    fn non_float_below_high_voltage_does_not_set_reference() {
        let mut detector = CalibrationDetector::default();
        let group = group();
        let config = publishers_config();
        let snap = snapshot_with(&[
            ("charge_state", TopicValue::String("Charging".to_string())),
            ("voltage", TopicValue::Float(53.0)),
            ("net_power", TopicValue::Float(100.0)),
            ("inflow", TopicValue::Float(120.0)),
            ("outflow", TopicValue::Float(100.0)),
        ]);
        let messages = detector.update(&group, &snap, Instant::now(), &config);
        assert!(messages.is_empty());
        assert!(detector.reference().is_none());
    }

    #[test]
    fn soc_drift_nudges_outflow_reference_down() {
        let mut detector = CalibrationDetector::default();
        let group = group();
        let config = publishers_config();

        let float_snap = snapshot_with(&[
            ("charge_state", TopicValue::String(FLOAT_CHARGING.to_string())),
            ("voltage", TopicValue::Float(54.2)),
            ("net_power", TopicValue::Float(0.0)),
            ("inflow", TopicValue::Float(120.0)),
            ("outflow", TopicValue::Float(100.0)),
        ]);
        detector.update(&group, &float_snap, Instant::now(), &config);

        let drift_snap = snapshot_with(&[
            ("charge_state", TopicValue::String("Charging".to_string())),
            ("voltage", TopicValue::Float(53.0)),
            ("net_power", TopicValue::Float(100.0)),
            ("soc", TopicValue::Float(99.8)),
            ("inflow", TopicValue::Float(121.0)),
            ("outflow", TopicValue::Float(101.0)),
        ]);
        let messages = detector.update(&group, &drift_snap, Instant::now(), &config);
        assert_eq!(messages.len(), 1);
        assert_eq!(detector.reference().unwrap().outflow_kwh, 100.0 - 0.005);
    }

    #[test]
    fn soc_integrator_clamps_to_capacity() {
        let group = group();
        let reference = CalibrationReference { inflow_kwh: 100.0, outflow_kwh: 100.0 };
        let snap = snapshot_with(&[
            ("inflow", TopicValue::Float(101.0)),
            ("outflow", TopicValue::Float(100.0)),
        ]);
        // 1000 Wh of inflow with no offsetting outflow would exceed capacity.
        let available = integrate_soc(&group, Some(reference), &snap, 0.0).unwrap();
        assert_eq!(available, 10_000.0);
    }

    #[test]
    fn soc_integrator_tracks_outflow_delta() {
        let group = group();
        let reference = CalibrationReference { inflow_kwh: 100.0, outflow_kwh: 100.0 };
        let snap = snapshot_with(&[
            ("inflow", TopicValue::Float(100.0)),
            ("outflow", TopicValue::Float(101.0)),
        ]);
        let available = integrate_soc(&group, Some(reference), &snap, 0.0).unwrap();
        assert_eq!(available, 10_000.0 - 1000.0);
    }

    #[test]
    fn soc_integrator_returns_none_without_a_reference() {
        let group = group();
        let snap = snapshot_with(&[]);
        assert!(integrate_soc(&group, None, &snap, 0.0).is_none());
    }
}
