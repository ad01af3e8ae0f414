//! Governor primitives: pure-ish state machines shared by the arbitration
//! engine to smooth or gate a raw signal before it becomes an actuator
//! command.

mod forecast_excess;
mod rolling_min_max;
mod slow_ramp;
mod stepped_hysteresis;

pub use forecast_excess::{ForecastExcess, ForecastExcessConfig, ForecastPeriod};
pub use rolling_min_max::RollingMinMax;
pub use slow_ramp::{SlowRamp, SlowRampConfig};
pub use stepped_hysteresis::{HysteresisConfig, SteppedHysteresis};
