//! Derived publishers: simple rules over a `Snapshot` that are not part of
//! the core statistics/arbitration engines but share their wiring (spec
//! §4.4). Calibration detector, SOC integrator, low-voltage trip, dump-load
//! selector.

mod calibration;
mod dump_load;
mod engine;
mod low_voltage;
mod model;
mod worker;

pub use calibration::{integrate_soc, CalibrationDetector, CalibrationReference};
pub use dump_load::{DumpLoadMode, DumpLoadSelector};
pub use engine::PublishersEngine;
pub use low_voltage::LowVoltageTrip;
pub use model::PublisherBatteryGroup;
pub use worker::run;
