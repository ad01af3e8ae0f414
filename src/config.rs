#![allow(dead_code)]
use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Command-line flags. Every flag also has an environment-variable
/// fallback so the process can be configured the same way whether it's
/// run interactively or under a supervisor/systemd unit.
#[derive(Debug, Clone, Parser)]
#[command(name = "home-energy-arbiter", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "ARBITER_CONFIG", default_value = "config/default.toml")]
    pub config_path: String,

    /// Bypass the remote enable/disable switch. Used for local development
    /// against a live broker where the production instance is disabled.
    #[arg(long, env = "ARBITER_FORCE_ENABLE", default_value_t = false)]
    pub force_enable: bool,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub broker: BrokerConfig,

    #[validate(nested)]
    pub topics: TopicsConfig,

    #[validate(nested)]
    pub percentiles: PercentileRegistryConfig,

    #[validate(nested)]
    pub expected_topics: ExpectedTopicsConfig,

    #[validate(nested)]
    pub battery_groups: Vec<BatteryGroupConfig>,

    #[validate(nested)]
    pub arbitration_topics: ArbitrationTopicsConfig,

    #[validate(nested)]
    pub governors: GovernorConfig,

    #[validate(nested)]
    pub publishers: PublishersConfig,

    /// Loaded separately from the environment, never from the TOML file.
    #[serde(skip)]
    pub credentials: Credentials,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BrokerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u16,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

/// Topic namespacing.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TopicsConfig {
    #[validate(length(min = 1))]
    pub prefix: String,

    /// Fixed proxy topic for outbound service calls (switch.turn_on/off).
    #[serde(default = "default_service_call_topic")]
    pub service_call_topic: String,

    /// Dashboard-controlled boolean gating non-discovery outbound messages
    /// (spec §4.5). Self-published `true` if the dashboard never retains one.
    #[serde(default = "default_enabled_topic")]
    pub enabled_topic: String,
}

/// A single `(topic, percentile, window)` entry in the percentile
/// registry. Topics not listed here get only a `Current` value.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PercentileSpec {
    #[validate(length(min = 1))]
    pub topic: String,

    #[validate(range(min = 1, max = 100))]
    pub percentile: u8,

    #[validate(range(min = 1, max = 3600))]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PercentileRegistryConfig {
    #[validate(nested)]
    #[serde(default)]
    pub entries: Vec<PercentileSpec>,
}

/// The synthetic value a self-published topic is seeded with if the
/// dashboard never retains a real one (spec §4.1: "floats to 0.0, booleans
/// to true").
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelfPublishedKind {
    Float,
    Bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SelfPublishedTopic {
    #[validate(length(min = 1))]
    pub topic: String,
    pub kind: SelfPublishedKind,
}

/// Topics the statistics engine must see before it starts emitting
/// snapshots, and the subset that gets a synthetic initial value after the
/// startup grace period.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ExpectedTopicsConfig {
    #[serde(default)]
    pub expected: Vec<String>,

    #[validate(nested)]
    #[serde(default)]
    pub self_published: Vec<SelfPublishedTopic>,
}

/// A single inverter: its entity id and the topic carrying its switch
/// state. State is always read fresh from the snapshot, never cached.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct InverterConfig {
    #[validate(length(min = 1))]
    pub entity_id: String,

    #[validate(length(min = 1))]
    pub state_topic: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BatteryGroupConfig {
    #[validate(length(min = 1))]
    pub short_name: String,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub inverters: Vec<InverterConfig>,

    #[validate(length(min = 1))]
    pub charge_state_topic: String,

    #[validate(length(min = 1))]
    pub soc_topic: String,

    #[validate(range(min = 1.0))]
    pub capacity_wh: f64,

    #[validate(range(min = 0.0))]
    pub solar_multiplier: f64,

    #[validate(length(min = 1))]
    pub available_energy_topic: String,

    /// Topic carrying the remaining-today solar forecast in Wh.
    #[validate(length(min = 1))]
    pub forecast_remaining_wh_topic: String,

    /// Topic carrying a JSON-encoded array of 30-minute forecast periods
    /// (`[{"start_minutes": u32, "pv_estimate_kw": f64}, ...]`).
    #[validate(length(min = 1))]
    pub forecast_periods_topic: String,

    /// Terminal voltage, read by the calibration detector and the
    /// low-voltage trip's 15-minute P1 percentile.
    #[validate(length(min = 1))]
    pub terminal_voltage_topic: String,

    /// Net charge/discharge power, read by the calibration detector's
    /// steady-state check.
    #[validate(length(min = 1))]
    pub net_power_topic: String,

    /// Cumulative energy counters the SOC integrator measures deltas
    /// against, anchored at the latest calibration reference point.
    #[validate(length(min = 1))]
    pub cumulative_inflow_kwh_topic: String,

    #[validate(length(min = 1))]
    pub cumulative_outflow_kwh_topic: String,

    /// Retained attributes topic the calibration detector publishes its
    /// reference point to.
    #[validate(length(min = 1))]
    pub calibration_reference_topic: String,

    /// Retained binary-sensor state topic for the low-voltage trip latch.
    #[validate(length(min = 1))]
    pub low_voltage_trip_topic: String,
}

/// Global topics the arbitration engine reads directly (as opposed to the
/// per-battery-group topics above).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ArbitrationTopicsConfig {
    #[validate(length(min = 1))]
    pub grid_frequency_topic: String,

    #[validate(length(min = 1))]
    pub grid_available_topic: String,

    #[validate(length(min = 1))]
    pub utility_battery_soc_topic: String,

    #[validate(length(min = 1))]
    pub load_power_topic: String,

    #[validate(length(min = 1))]
    pub current_solar_topic: String,

    #[validate(length(min = 1))]
    pub transfer_solar_topic: String,
}

/// Tuning constants for the governor primitives and the limits they feed.
/// Defaults come from spec's worked examples; every field is overridable
/// per-deployment.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GovernorConfig {
    #[serde(default = "default_inverter_watts")]
    pub per_inverter_watts: f64,

    #[serde(default = "default_overflow_in_band")]
    pub overflow_in_band: (f64, f64),

    #[serde(default = "default_overflow_out_band")]
    pub overflow_out_band: (f64, f64),

    #[serde(default = "default_soc_lockout_in_band")]
    pub soc_lockout_in_band: (f64, f64),

    #[serde(default = "default_soc_lockout_out_band")]
    pub soc_lockout_out_band: (f64, f64),

    #[serde(default = "default_powerwall_low_in_band")]
    pub powerwall_low_in_band: (f64, f64),

    #[serde(default = "default_powerwall_low_out_band")]
    pub powerwall_low_out_band: (f64, f64),

    #[serde(default = "default_islanded_soc_threshold")]
    pub islanded_soc_threshold: f64,

    #[serde(default = "default_grid_freq_threshold_hz")]
    pub grid_freq_threshold_hz: f64,

    #[serde(default = "default_max_transfer_power")]
    pub max_transfer_power: f64,

    #[serde(default = "default_global_max_inverters")]
    pub global_max_inverters: u32,
}

/// Thresholds for the derived publishers (calibration, low-voltage trip,
/// dump-load selector, SOC integrator). These are contract-only in the
/// core control loop but still live in the shared configuration so a
/// single file governs the whole deployment.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PublishersConfig {
    #[serde(default = "default_calibration_high_voltage_threshold")]
    pub calibration_high_voltage_threshold: f64,

    #[serde(default = "default_calibration_power_band_watts")]
    pub calibration_power_band_watts: f64,

    #[serde(default = "default_calibration_cooldown_secs")]
    pub calibration_cooldown_secs: u64,

    #[serde(default = "default_calibration_nudge_kwh")]
    pub calibration_nudge_kwh: f64,

    #[serde(default = "default_low_voltage_trip_threshold")]
    pub low_voltage_trip_threshold: f64,

    #[serde(default = "default_low_voltage_rearm_minutes")]
    pub low_voltage_rearm_minutes: u64,

    #[serde(default = "default_dump_load_super_watts")]
    pub dump_load_super_watts: f64,

    #[serde(default = "default_dump_load_standard_watts")]
    pub dump_load_standard_watts: f64,

    #[serde(default = "default_dump_load_eco_watts")]
    pub dump_load_eco_watts: f64,

    #[serde(default = "default_soc_loss_rate")]
    pub soc_loss_rate: f64,

    #[serde(default = "default_dump_load_mode_topic")]
    pub dump_load_mode_topic: String,
}

/// Broker credentials, loaded exclusively from the environment (see
/// `Credentials::from_env`). The handwritten `Debug` impl redacts the
/// password so a stray `{:?}` log line never leaks it.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_id_suffix: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***redacted***")
            .field("client_id_suffix", &self.client_id_suffix)
            .finish()
    }
}

impl Credentials {
    /// Reads `OEC_MQTT_USERNAME`, `OEC_MQTT_PASSWORD`, `OEC_MQTT_CLIENT_ID`
    /// from the environment (optionally seeded by a local `.env` file via
    /// `dotenvy`, already loaded by the caller at process start).
    pub fn from_env() -> Result<Self> {
        #[derive(Debug, Deserialize)]
        struct Raw {
            username: String,
            password: String,
            #[serde(default)]
            client_id: String,
        }

        let raw: Raw = Figment::new()
            .merge(Env::prefixed("OEC_MQTT_"))
            .extract()
            .context("missing broker credentials (OEC_MQTT_USERNAME / OEC_MQTT_PASSWORD)")?;

        Ok(Self {
            username: raw.username,
            password: raw.password,
            client_id_suffix: raw.client_id,
        })
    }
}

// Default value functions.
fn default_keepalive_secs() -> u16 {
    30
}
fn default_client_id_prefix() -> String {
    "home-energy-arbiter".to_string()
}
fn default_service_call_topic() -> String {
    "homeassistant/service_call".to_string()
}
fn default_enabled_topic() -> String {
    "oec/switch/arbiter_enabled/state".to_string()
}
fn default_inverter_watts() -> f64 {
    250.0
}
fn default_overflow_in_band() -> (f64, f64) {
    (95.75, 99.5)
}
fn default_overflow_out_band() -> (f64, f64) {
    (98.5, 95.0)
}
fn default_soc_lockout_in_band() -> (f64, f64) {
    (15.0, 25.0)
}
fn default_soc_lockout_out_band() -> (f64, f64) {
    (12.5, 22.5)
}
fn default_powerwall_low_in_band() -> (f64, f64) {
    (41.0, 25.0)
}
fn default_powerwall_low_out_band() -> (f64, f64) {
    (28.0, 44.0)
}
fn default_islanded_soc_threshold() -> f64 {
    90.0
}
fn default_grid_freq_threshold_hz() -> f64 {
    52.75
}
fn default_max_transfer_power() -> f64 {
    10_000.0
}
fn default_global_max_inverters() -> u32 {
    9
}
fn default_calibration_high_voltage_threshold() -> f64 {
    54.0
}
fn default_calibration_power_band_watts() -> f64 {
    50.0
}
fn default_calibration_cooldown_secs() -> u64 {
    2
}
fn default_calibration_nudge_kwh() -> f64 {
    0.005
}
fn default_low_voltage_trip_threshold() -> f64 {
    46.0
}
fn default_low_voltage_rearm_minutes() -> u64 {
    16
}
fn default_dump_load_super_watts() -> f64 {
    3000.0
}
fn default_dump_load_standard_watts() -> f64 {
    1500.0
}
fn default_dump_load_eco_watts() -> f64 {
    500.0
}
fn default_soc_loss_rate() -> f64 {
    0.0
}
fn default_dump_load_mode_topic() -> String {
    "oec/select/dump_load_mode/state".to_string()
}

impl AppConfig {
    /// Load configuration from the TOML file named on the command line,
    /// then overlay `ARBITER__`-prefixed environment variables, then
    /// attach credentials loaded separately from `OEC_MQTT_*`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(&cli.config_path))
            .merge(Env::prefixed("ARBITER__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .context("failed to parse configuration")?;

        config.validate().context("configuration validation failed")?;
        config.credentials = Credentials::from_env()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_battery_group() -> BatteryGroupConfig {
        BatteryGroupConfig {
            short_name: "B2".to_string(),
            inverters: vec![InverterConfig {
                entity_id: "switch.b2_inverter_1".to_string(),
                state_topic: "oec/switch/b2_inverter_1/state".to_string(),
            }],
            charge_state_topic: "oec/sensor/b2_charge_state/state".to_string(),
            soc_topic: "oec/sensor/b2_soc/state".to_string(),
            capacity_wh: 10_000.0,
            solar_multiplier: 1.0,
            available_energy_topic: "oec/sensor/b2_available/state".to_string(),
            forecast_remaining_wh_topic: "oec/sensor/solar_remaining_wh/state".to_string(),
            forecast_periods_topic: "oec/sensor/solar_periods/state".to_string(),
            terminal_voltage_topic: "oec/sensor/b2_voltage/state".to_string(),
            net_power_topic: "oec/sensor/b2_net_power/state".to_string(),
            cumulative_inflow_kwh_topic: "oec/sensor/b2_inflow_kwh/state".to_string(),
            cumulative_outflow_kwh_topic: "oec/sensor/b2_outflow_kwh/state".to_string(),
            low_voltage_trip_topic: "oec/binary_sensor/b2_low_voltage_trip/state".to_string(),
            calibration_reference_topic: "oec/sensor/b2_calibration/attributes".to_string(),
        }
    }

    #[test]
    fn battery_group_validates_with_sane_fields() {
        assert!(sample_battery_group().validate().is_ok());
    }

    #[test]
    fn battery_group_rejects_zero_capacity() {
        let mut group = sample_battery_group();
        group.capacity_wh = 0.0;
        assert!(group.validate().is_err());
    }

    #[test]
    fn percentile_spec_rejects_out_of_range_percentile() {
        let spec = PercentileSpec {
            topic: "oec/sensor/solar1_power/state".to_string(),
            percentile: 150,
            window_seconds: 900,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "arbiter".to_string(),
            password: "hunter2".to_string(),
            client_id_suffix: "dev".to_string(),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("arbiter"));
    }
}
