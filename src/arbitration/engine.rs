//! The inverter-arbitration state machine: on every snapshot, determine
//! the integer inverter count per battery group and emit the minimal set
//! of actuator commands to reach it. See spec §4.3.

use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{ArbitrationTopicsConfig, GovernorConfig};
use crate::governor::ForecastPeriod;
use crate::stats::Snapshot;

use super::model::{ActuatorCommand, ArbitrationState, BatteryGroup};

const GRID_FREQ_SAFETY_WINDOW: Duration = Duration::from_secs(5 * 60);
const TRANSFER_SOLAR_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
struct RawForecastPeriod {
    start_minutes: u32,
    pv_estimate_kw: f64,
}

fn parse_periods(raw: Option<&str>) -> Vec<ForecastPeriod> {
    let Some(raw) = raw else { return Vec::new() };
    let parsed: Vec<RawForecastPeriod> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "could not parse forecast periods payload");
            return Vec::new();
        }
    };
    parsed
        .into_iter()
        .map(|p| ForecastPeriod {
            start: NaiveTime::MIN + chrono::Duration::minutes(p.start_minutes as i64),
            pv_estimate_kw: p.pv_estimate_kw,
        })
        .collect()
}

pub struct ArbitrationEngine {
    groups: Vec<BatteryGroup>,
    topics: ArbitrationTopicsConfig,
    governors: GovernorConfig,
    state: ArbitrationState,
}

impl ArbitrationEngine {
    pub fn new(groups: Vec<BatteryGroup>, topics: ArbitrationTopicsConfig, governors: GovernorConfig) -> Self {
        let state = ArbitrationState::new(&groups, &governors);
        Self { groups, topics, governors, state }
    }

    fn safety_preemption(&self, snapshot: &Snapshot) -> bool {
        let freq_p100 = snapshot
            .percentile(&self.topics.grid_frequency_topic, 100, GRID_FREQ_SAFETY_WINDOW)
            .unwrap_or(0.0);
        if freq_p100 > self.governors.grid_freq_threshold_hz {
            info!(freq_p100, "safety pre-emption: grid over-frequency");
            return true;
        }

        let grid_available = snapshot.get_bool(&self.topics.grid_available_topic).unwrap_or(true);
        let utility_soc = snapshot.get_float(&self.topics.utility_battery_soc_topic).unwrap_or(0.0);
        if !grid_available && utility_soc > self.governors.islanded_soc_threshold {
            info!(utility_soc, "safety pre-emption: islanded with a full utility battery");
            return true;
        }

        false
    }

    fn transfer_limit_watts(&self, snapshot: &Snapshot) -> f64 {
        let solar_p90 = snapshot
            .percentile(&self.topics.transfer_solar_topic, 90, TRANSFER_SOLAR_WINDOW)
            .unwrap_or(0.0);
        self.governors.max_transfer_power - solar_p90
    }

    /// Per-battery Overflow/ForecastExcess counts, before lockout/limit.
    fn per_battery_raw_counts(
        &mut self,
        snapshot: &Snapshot,
        now_time: NaiveTime,
        today: NaiveDate,
    ) -> Vec<u32> {
        let per_inverter = self.governors.per_inverter_watts;
        self.groups
            .iter()
            .map(|group| {
                let soc = snapshot.get_float(&group.soc_topic).unwrap_or(0.0);
                let battery = self.state.batteries.get_mut(&group.short_name).expect("battery state");

                let overflow_steps = battery.overflow.update(soc);
                let overflow_watts = overflow_steps as f64 * per_inverter;

                let forecast_remaining_wh =
                    snapshot.get_float(&group.forecast_remaining_wh_topic).unwrap_or(0.0);
                let periods_raw = snapshot.get_string(&group.forecast_periods_topic);
                let periods = parse_periods(periods_raw);
                let available_wh = snapshot.get_float(&group.available_energy_topic).unwrap_or(0.0);
                let forecast_watts = battery.forecast_excess.update(
                    now_time,
                    today,
                    &periods,
                    forecast_remaining_wh,
                    available_wh,
                    group.capacity_wh,
                );

                let raw_watts = overflow_watts.max(forecast_watts);
                (raw_watts / per_inverter).floor().max(0.0) as u32
            })
            .collect()
    }

    fn soc_caps(&mut self, snapshot: &Snapshot) -> Vec<u32> {
        self.groups
            .iter()
            .map(|group| {
                let soc = snapshot.get_float(&group.soc_topic).unwrap_or(0.0);
                let battery = self.state.batteries.get_mut(&group.short_name).expect("battery state");
                battery.soc_lockout.update(soc)
            })
            .collect()
    }

    /// Reduce `counts` (in inverter-slot units) so their combined wattage
    /// fits under `limit_watts`, reducing the largest group first and
    /// tie-breaking toward the later group in the list (spec §4.3.4).
    fn trim_to_transfer_limit(&self, counts: &mut [u32], limit_watts: f64) {
        let per_inverter = self.governors.per_inverter_watts;
        loop {
            let total_watts = counts.iter().sum::<u32>() as f64 * per_inverter;
            if total_watts <= limit_watts || counts.iter().all(|c| *c == 0) {
                break;
            }
            // `max_by_key` returns the *last* maximum on ties, so the later
            // group in the list is the one trimmed first.
            let (idx, _) = counts
                .iter()
                .enumerate()
                .max_by_key(|(_, c)| **c)
                .expect("counts is non-empty");
            counts[idx] -= 1;
        }
    }

    fn global_mode_watts(&mut self, snapshot: &Snapshot) -> f64 {
        let load_power = snapshot.get_float(&self.topics.load_power_topic).unwrap_or(0.0);
        let current_solar = snapshot.get_float(&self.topics.current_solar_topic).unwrap_or(0.0);
        let raw_last = (load_power - current_solar) * (2.0 / 3.0);
        let powerwall_last_watts = self.state.powerwall_last.update(raw_last);

        let utility_soc = snapshot.get_float(&self.topics.utility_battery_soc_topic).unwrap_or(0.0);
        let powerwall_low_steps = self.state.powerwall_low.update(utility_soc);
        let powerwall_low_watts = powerwall_low_steps as f64 * self.governors.per_inverter_watts;

        powerwall_last_watts.max(powerwall_low_watts)
    }

    /// Distribute additional inverter slots beyond the per-battery base,
    /// alternating starting from the second group, skipping any group
    /// already at its SOC cap.
    fn round_robin_additional(&self, counts: &mut [u32], caps: &[u32], target_total: u32) {
        if counts.is_empty() {
            return;
        }
        let mut remaining = target_total.saturating_sub(counts.iter().sum());
        if remaining == 0 {
            return;
        }

        let n = counts.len();
        let mut idx = if n > 1 { 1 } else { 0 };
        let mut stalled_pass = 0usize;

        while remaining > 0 && stalled_pass < n {
            if counts[idx] < caps[idx] {
                counts[idx] += 1;
                remaining -= 1;
                stalled_pass = 0;
            } else {
                stalled_pass += 1;
            }
            idx = (idx + 1) % n;
        }
    }

    /// Evaluate one snapshot and return the actuator commands needed to
    /// reach the desired state (empty if nothing needs to change).
    pub fn evaluate(&mut self, snapshot: &Snapshot, now_time: NaiveTime, today: NaiveDate) -> Vec<ActuatorCommand> {
        if self.safety_preemption(snapshot) {
            return self.actuate(snapshot, &vec![0; self.groups.len()]);
        }

        let mut counts = self.per_battery_raw_counts(snapshot, now_time, today);
        let caps = self.soc_caps(snapshot);
        for (count, cap) in counts.iter_mut().zip(caps.iter()) {
            *count = (*count).min(*cap);
        }

        let grid_available = snapshot.get_bool(&self.topics.grid_available_topic).unwrap_or(true);
        if !grid_available {
            for count in counts.iter_mut() {
                *count = 0;
            }
        }

        let limit_watts = self.transfer_limit_watts(snapshot);
        self.trim_to_transfer_limit(&mut counts, limit_watts);

        let global_watts = self.global_mode_watts(snapshot).min(limit_watts.max(0.0));
        let global_count = ((global_watts / self.governors.per_inverter_watts).ceil() as u32)
            .min(self.governors.global_max_inverters);

        let limited_total: u32 = counts.iter().sum();
        if global_count > limited_total {
            self.round_robin_additional(&mut counts, &caps, global_count);
        }

        debug!(?counts, global_count, limited_total, "arbitration decision");
        self.actuate(snapshot, &counts)
    }

    /// For each inverter, read its live switch state from the snapshot and
    /// emit a command only on mismatch (spec §4.3.6/§9: never cache
    /// external state).
    fn actuate(&mut self, snapshot: &Snapshot, counts: &[u32]) -> Vec<ActuatorCommand> {
        let mut commands = Vec::new();
        for (group, &count) in self.groups.iter().zip(counts.iter()) {
            for (i, inverter) in group.inverters.iter().enumerate() {
                let desired_on = (i as u32) < count;
                let current_on = snapshot.get_bool(&inverter.state_topic).unwrap_or(false);
                if desired_on != current_on {
                    commands.push(ActuatorCommand {
                        entity_id: inverter.entity_id.clone(),
                        turn_on: desired_on,
                    });
                }
            }
        }
        self.state.last_debug = format!("{counts:?}");
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatteryGroupConfig, GovernorConfig, InverterConfig};

    fn governors() -> GovernorConfig {
        GovernorConfig {
            per_inverter_watts: 250.0,
            overflow_in_band: (95.75, 99.5),
            overflow_out_band: (98.5, 95.0),
            soc_lockout_in_band: (15.0, 25.0),
            soc_lockout_out_band: (12.5, 22.5),
            powerwall_low_in_band: (41.0, 25.0),
            powerwall_low_out_band: (28.0, 44.0),
            islanded_soc_threshold: 90.0,
            grid_freq_threshold_hz: 52.75,
            max_transfer_power: 10_000.0,
            global_max_inverters: 9,
        }
    }

    fn topics() -> ArbitrationTopicsConfig {
        ArbitrationTopicsConfig {
            grid_frequency_topic: "grid_frequency".to_string(),
            grid_available_topic: "grid_available".to_string(),
            utility_battery_soc_topic: "utility_soc".to_string(),
            load_power_topic: "load_power".to_string(),
            current_solar_topic: "current_solar".to_string(),
            transfer_solar_topic: "solar1_power".to_string(),
        }
    }

    fn group(short_name: &str, n_inverters: usize) -> BatteryGroup {
        let cfg = BatteryGroupConfig {
            short_name: short_name.to_string(),
            inverters: (0..n_inverters)
                .map(|i| InverterConfig {
                    entity_id: format!("switch.{short_name}_inv{i}"),
                    state_topic: format!("{short_name}_inv{i}_state"),
                })
                .collect(),
            charge_state_topic: format!("{short_name}_charge_state"),
            soc_topic: format!("{short_name}_soc"),
            capacity_wh: 10_000.0,
            solar_multiplier: 1.0,
            available_energy_topic: format!("{short_name}_available"),
            forecast_remaining_wh_topic: format!("{short_name}_forecast_remaining"),
            forecast_periods_topic: format!("{short_name}_forecast_periods"),
            terminal_voltage_topic: format!("{short_name}_voltage"),
            net_power_topic: format!("{short_name}_net_power"),
            cumulative_inflow_kwh_topic: format!("{short_name}_inflow_kwh"),
            cumulative_outflow_kwh_topic: format!("{short_name}_outflow_kwh"),
            low_voltage_trip_topic: format!("{short_name}_low_voltage_trip"),
            calibration_reference_topic: format!("{short_name}_calibration"),
        };
        BatteryGroup::from_config(&cfg)
    }

    fn base_snapshot() -> Snapshot {
        let mut snap = Snapshot::default();
        snap.topic_values.insert("grid_available".to_string(), crate::stats::TopicValue::Bool(true));
        snap.topic_values.insert("utility_soc".to_string(), crate::stats::TopicValue::Float(50.0));
        snap.topic_values.insert("load_power".to_string(), crate::stats::TopicValue::Float(0.0));
        snap.topic_values.insert("current_solar".to_string(), crate::stats::TopicValue::Float(0.0));
        snap
    }

    fn now_time() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    /// Scenario 5 from spec §8: safety pre-emption.
    #[test]
    fn over_frequency_forces_everything_off() {
        let groups = vec![group("b2", 2), group("b3", 2)];
        let mut engine = ArbitrationEngine::new(groups, topics(), governors());

        let mut snap = base_snapshot();
        snap.percentiles.insert(
            crate::stats::PercentileKey::new("grid_frequency", 100, GRID_FREQ_SAFETY_WINDOW),
            53.0,
        );
        snap.topic_values.insert("b2_soc".to_string(), crate::stats::TopicValue::Float(99.0));
        snap.topic_values.insert("b3_soc".to_string(), crate::stats::TopicValue::Float(99.0));
        for i in 0..2 {
            snap.topic_values.insert(format!("b2_inv{i}_state"), crate::stats::TopicValue::Bool(true));
            snap.topic_values.insert(format!("b3_inv{i}_state"), crate::stats::TopicValue::Bool(true));
        }

        let commands = engine.evaluate(&snap, now_time(), today());
        assert_eq!(commands.len(), 4);
        assert!(commands.iter().all(|c| !c.turn_on));
    }

    /// Scenario 6 from spec §8: round-robin from base.
    #[test]
    fn round_robin_fills_from_second_battery_respecting_caps() {
        let groups = vec![group("b2", 4), group("b3", 5)];
        let mut engine = ArbitrationEngine::new(groups, topics(), governors());

        // Force raw per-battery bases to exactly (1, 1) and caps to (4, 5)
        // by directly driving the governor state through repeated updates
        // rather than re-deriving the hysteresis thresholds here.
        let mut counts = vec![1u32, 1u32];
        let caps = vec![4u32, 5u32];
        engine.round_robin_additional(&mut counts, &caps, 5);
        assert_eq!(counts, vec![2, 3]);
    }

    #[test]
    fn repeated_identical_snapshots_issue_zero_commands_the_second_time() {
        let groups = vec![group("b2", 1)];
        let mut engine = ArbitrationEngine::new(groups, topics(), governors());

        let mut snap = base_snapshot();
        snap.topic_values.insert("b2_soc".to_string(), crate::stats::TopicValue::Float(50.0));
        snap.topic_values.insert("b2_inv0_state".to_string(), crate::stats::TopicValue::Bool(false));

        let first = engine.evaluate(&snap, now_time(), today());
        // Apply the first batch of commands to the snapshot, as the real
        // switch would reflect after actuation.
        for cmd in &first {
            snap.topic_values.insert(
                "b2_inv0_state".to_string(),
                crate::stats::TopicValue::Bool(cmd.turn_on),
            );
        }
        let second = engine.evaluate(&snap, now_time(), today());
        assert!(second.is_empty(), "expected idempotent second evaluation, got {second:?}");
    }

    #[test]
    fn transfer_limit_trims_the_larger_group_first_tie_break_to_second() {
        let groups = vec![group("b2", 9), group("b3", 9)];
        let engine = ArbitrationEngine::new(groups, topics(), governors());
        let mut counts = vec![3u32, 3u32];
        // Limit allows only 4 inverters' worth of power.
        engine.trim_to_transfer_limit(&mut counts, 4.0 * 250.0);
        assert_eq!(counts.iter().sum::<u32>(), 4);
        // Tie-break reduced b3 (index 1) first.
        assert!(counts[1] <= counts[0]);
    }

    #[test]
    fn transfer_limit_tie_break_reduces_the_second_group_on_an_odd_step() {
        let groups = vec![group("b2", 9), group("b3", 9)];
        let engine = ArbitrationEngine::new(groups, topics(), governors());
        let mut counts = vec![3u32, 3u32];
        // Limit allows only 5 inverters' worth of power: a single reduction
        // from the tied (3, 3) starting point, which must land on b3.
        engine.trim_to_transfer_limit(&mut counts, 5.0 * 250.0);
        assert_eq!(counts, vec![3, 2]);
    }
}
