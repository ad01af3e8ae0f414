//! The inverter-arbitration engine: fuses the governor primitives into the
//! mode-selection algorithm that drives the inverter fleet.

mod engine;
mod model;
mod worker;

pub use engine::ArbitrationEngine;
pub use model::{ActuatorCommand, ArbitrationState, BatteryGroup, BatteryState, InverterInfo};
pub use worker::run;
