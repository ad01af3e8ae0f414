//! Per-battery wiring for the derived publishers. Kept separate from
//! `arbitration::model::BatteryGroup` since these publishers read topics
//! (terminal voltage, cumulative energy counters) the arbitration engine
//! itself never touches.

use crate::config::BatteryGroupConfig;

#[derive(Debug, Clone)]
pub struct PublisherBatteryGroup {
    pub short_name: String,
    pub inverter_entity_ids: Vec<String>,
    pub charge_state_topic: String,
    pub soc_topic: String,
    pub terminal_voltage_topic: String,
    pub net_power_topic: String,
    pub cumulative_inflow_kwh_topic: String,
    pub cumulative_outflow_kwh_topic: String,
    pub calibration_reference_topic: String,
    pub available_energy_topic: String,
    pub low_voltage_trip_topic: String,
    pub capacity_wh: f64,
}

impl PublisherBatteryGroup {
    pub fn from_config(c: &BatteryGroupConfig) -> Self {
        Self {
            short_name: c.short_name.clone(),
            inverter_entity_ids: c.inverters.iter().map(|i| i.entity_id.clone()).collect(),
            charge_state_topic: c.charge_state_topic.clone(),
            soc_topic: c.soc_topic.clone(),
            terminal_voltage_topic: c.terminal_voltage_topic.clone(),
            net_power_topic: c.net_power_topic.clone(),
            cumulative_inflow_kwh_topic: c.cumulative_inflow_kwh_topic.clone(),
            cumulative_outflow_kwh_topic: c.cumulative_outflow_kwh_topic.clone(),
            calibration_reference_topic: c.calibration_reference_topic.clone(),
            available_energy_topic: c.available_energy_topic.clone(),
            low_voltage_trip_topic: c.low_voltage_trip_topic.clone(),
            capacity_wh: c.capacity_wh,
        }
    }
}
