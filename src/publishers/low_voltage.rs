//! Low-voltage trip: latches every inverter in a battery's group off when
//! the 15-minute P1 of terminal voltage falls below threshold, and re-arms
//! after a configured cooldown (spec §4.4).

use std::time::{Duration, Instant};

use crate::outbound::switch_service_call;
use crate::outbound::OutboundMessage;
use crate::stats::Snapshot;

use super::model::PublisherBatteryGroup;

const P1_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default)]
pub struct LowVoltageTrip {
    tripped: bool,
    rearm_at: Option<Instant>,
}

impl LowVoltageTrip {
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn update(
        &mut self,
        group: &PublisherBatteryGroup,
        snapshot: &Snapshot,
        now: Instant,
        threshold: f64,
        rearm_minutes: u64,
    ) -> Vec<OutboundMessage> {
        if self.tripped {
            if let Some(rearm_at) = self.rearm_at {
                if now >= rearm_at {
                    self.tripped = false;
                    self.rearm_at = None;
                }
            }
            return Vec::new();
        }

        let Some(p1) = snapshot.percentile(&group.terminal_voltage_topic, 1, P1_WINDOW) else {
            return Vec::new();
        };

        if p1 < threshold {
            self.tripped = true;
            self.rearm_at = Some(now + Duration::from_secs(rearm_minutes * 60));
            group
                .inverter_entity_ids
                .iter()
                .map(|entity_id| switch_service_call(entity_id, false))
                .collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn group() -> PublisherBatteryGroup {
        PublisherBatteryGroup {
            short_name: "B2".to_string(),
            inverter_entity_ids: vec!["switch.b2_inverter_1".to_string(), "switch.b2_inverter_2".to_string()],
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

    fn snapshot_with_p1(value: f64) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.percentiles.insert(
            crate::stats::PercentileKey::new("voltage", 1, P1_WINDOW),
            value,
        );
        snap
    }

    #[test]
    fn trips_and_turns_off_every_inverter_below_threshold() {
        let mut trip = LowVoltageTrip::default();
        let group = group();
        let snap = snapshot_with_p1(44.0);
        let messages = trip.update(&group, &snap, Instant::now(), 46.0, 16);
        assert_eq!(messages.len(), 2);
        assert!(trip.is_tripped());
    }

    #[test]
    fn stays_latched_until_rearm_elapses() {
        let mut trip = LowVoltageTrip::default();
        let group = group();
        let start = Instant::now();
        trip.update(&group, &snapshot_with_p1(44.0), start, 46.0, 16);
        assert!(trip.is_tripped());

        let messages = trip.update(&group, &snapshot_with_p1(48.0), start + StdDuration::from_secs(60), 46.0, 16);
        assert!(messages.is_empty());
        assert!(trip.is_tripped());

        trip.update(
            &group,
            &snapshot_with_p1(48.0),
            start + StdDuration::from_secs(16 * 60 + 1),
            46.0,
            16,
        );
        assert!(!trip.is_tripped());
    }
}
