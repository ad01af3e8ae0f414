//! Data owned exclusively by the arbitration engine: per-battery wiring
//! and the governor state it drives.

use std::collections::HashMap;

use crate::config::{BatteryGroupConfig, GovernorConfig, InverterConfig};
use crate::governor::{
    ForecastExcess, ForecastExcessConfig, HysteresisConfig, SlowRamp, SlowRampConfig,
    SteppedHysteresis,
};

/// `(entity_id, state_topic)`. State is read from the snapshot, never
/// cached locally.
#[derive(Debug, Clone)]
pub struct InverterInfo {
    pub entity_id: String,
    pub state_topic: String,
}

impl From<&InverterConfig> for InverterInfo {
    fn from(c: &InverterConfig) -> Self {
        Self {
            entity_id: c.entity_id.clone(),
            state_topic: c.state_topic.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatteryGroup {
    pub short_name: String,
    pub inverters: Vec<InverterInfo>,
    pub soc_topic: String,
    pub available_energy_topic: String,
    pub forecast_remaining_wh_topic: String,
    pub forecast_periods_topic: String,
    pub capacity_wh: f64,
    pub solar_multiplier: f64,
}

impl BatteryGroup {
    pub fn from_config(c: &BatteryGroupConfig) -> Self {
        Self {
            short_name: c.short_name.clone(),
            inverters: c.inverters.iter().map(InverterInfo::from).collect(),
            soc_topic: c.soc_topic.clone(),
            available_energy_topic: c.available_energy_topic.clone(),
            forecast_remaining_wh_topic: c.forecast_remaining_wh_topic.clone(),
            forecast_periods_topic: c.forecast_periods_topic.clone(),
            capacity_wh: c.capacity_wh,
            solar_multiplier: c.solar_multiplier,
        }
    }

    pub fn inverter_count(&self) -> u32 {
        self.inverters.len() as u32
    }
}

/// Per-battery governor state: two hysteresis curves plus a forecast-
/// excess ratchet, all sized to that battery's own inverter count.
pub struct BatteryState {
    pub overflow: SteppedHysteresis,
    pub soc_lockout: SteppedHysteresis,
    pub forecast_excess: ForecastExcess,
}

impl BatteryState {
    pub fn new(group: &BatteryGroup, governors: &GovernorConfig) -> Self {
        let n = group.inverter_count();
        Self {
            overflow: SteppedHysteresis::new(HysteresisConfig::new(
                n,
                true,
                governors.overflow_in_band,
                governors.overflow_out_band,
            )),
            soc_lockout: SteppedHysteresis::new(HysteresisConfig::new(
                n,
                true,
                governors.soc_lockout_in_band,
                governors.soc_lockout_out_band,
            )),
            forecast_excess: ForecastExcess::new(ForecastExcessConfig {
                inverters: n,
                per_inverter_watts: governors.per_inverter_watts,
                solar_multiplier: group.solar_multiplier,
            }),
        }
    }
}

/// The arbitration engine's exclusively-owned mutable state.
pub struct ArbitrationState {
    pub batteries: HashMap<String, BatteryState>,
    pub powerwall_last: SlowRamp,
    pub powerwall_low: SteppedHysteresis,
    pub last_debug: String,
}

impl ArbitrationState {
    pub fn new(groups: &[BatteryGroup], governors: &GovernorConfig) -> Self {
        let batteries = groups
            .iter()
            .map(|g| (g.short_name.clone(), BatteryState::new(g, governors)))
            .collect();

        // Pressure-to-full equals two inverter widths (spec §4.3.3).
        let full_pressure_diff = 2.0 * governors.per_inverter_watts;
        Self {
            batteries,
            powerwall_last: SlowRamp::new(SlowRampConfig::default_timing(full_pressure_diff)),
            powerwall_low: SteppedHysteresis::new(HysteresisConfig::new(
                9,
                false,
                governors.powerwall_low_in_band,
                governors.powerwall_low_out_band,
            )),
            last_debug: String::new(),
        }
    }
}

/// The result of actuation: a switch that needs to change state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub entity_id: String,
    pub turn_on: bool,
}
