//! Dump-load selector: thresholded mapping of excess solar watts to a named
//! operating mode, emitted only on change (spec §4.4).

use crate::config::{ArbitrationTopicsConfig, PublishersConfig};
use crate::outbound::OutboundMessage;
use crate::stats::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpLoadMode {
    Super,
    Standard,
    Eco,
    Standby,
}

impl DumpLoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpLoadMode::Super => "Super",
            DumpLoadMode::Standard => "Standard",
            DumpLoadMode::Eco => "Eco",
            DumpLoadMode::Standby => "Standby",
        }
    }

    fn from_excess_watts(excess: f64, config: &PublishersConfig) -> Self {
        if excess >= config.dump_load_super_watts {
            DumpLoadMode::Super
        } else if excess >= config.dump_load_standard_watts {
            DumpLoadMode::Standard
        } else if excess >= config.dump_load_eco_watts {
            DumpLoadMode::Eco
        } else {
            DumpLoadMode::Standby
        }
    }
}

#[derive(Debug, Default)]
pub struct DumpLoadSelector {
    current: Option<DumpLoadMode>,
}

impl DumpLoadSelector {
    /// Excess watts is solar production less load draw, a simple aggregate
    /// over the two relevant arbitration topics.
    pub fn update(
        &mut self,
        snapshot: &Snapshot,
        topics: &ArbitrationTopicsConfig,
        config: &PublishersConfig,
    ) -> Vec<OutboundMessage> {
        let solar = snapshot.get_float(&topics.current_solar_topic).unwrap_or(0.0);
        let load = snapshot.get_float(&topics.load_power_topic).unwrap_or(0.0);
        let excess = solar - load;
        let mode = DumpLoadMode::from_excess_watts(excess, config);

        if self.current == Some(mode) {
            return Vec::new();
        }
        self.current = Some(mode);
        vec![OutboundMessage::State {
            topic: config.dump_load_mode_topic.clone(),
            payload: mode.as_str().to_string(),
            retain: false,
        }]
    }
}
