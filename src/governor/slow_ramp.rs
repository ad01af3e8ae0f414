//! Pressure-gated accelerating ramp: ignores short oscillations around a
//! target but responds to sustained deviations, accelerating the longer the
//! deviation persists. See spec §4.2.2.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlowRampConfig {
    pub full_pressure_diff: f64,
    pub threshold_seconds: f64,
    pub pressure_cap_seconds: f64,
    pub decay_multiplier: f64,
    pub rate_accel: f64,
}

impl SlowRampConfig {
    /// Derive `rate_accel` from a desired max slew (units/s) at the pressure
    /// cap, per spec's default tuning note (100 units/s at cap).
    pub fn with_max_slew_at_cap(
        full_pressure_diff: f64,
        threshold_seconds: f64,
        pressure_cap_seconds: f64,
        decay_multiplier: f64,
        max_slew_at_cap: f64,
    ) -> Self {
        let headroom = pressure_cap_seconds - threshold_seconds;
        let rate_accel = if headroom > 0.0 {
            max_slew_at_cap / (headroom * headroom)
        } else {
            0.0
        };
        Self {
            full_pressure_diff,
            threshold_seconds,
            pressure_cap_seconds,
            decay_multiplier,
            rate_accel,
        }
    }

    /// Default tuning: two-inverter-width full pressure diff is caller
    /// supplied (it depends on per-inverter wattage), so this only fixes
    /// the time constants spec gives directly: threshold 600s, cap 660s,
    /// decay multiplier 2, max slew 100 units/s at cap.
    pub fn default_timing(full_pressure_diff: f64) -> Self {
        Self::with_max_slew_at_cap(full_pressure_diff, 600.0, 660.0, 2.0, 100.0)
    }
}

#[derive(Debug, Clone)]
pub struct SlowRamp {
    config: SlowRampConfig,
    current: f64,
    pressure: f64,
    initialized: bool,
}

impl SlowRamp {
    pub fn new(config: SlowRampConfig) -> Self {
        Self {
            config,
            current: 0.0,
            pressure: 0.0,
            initialized: false,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    /// Advance one tick (`dt` is fixed at 1s per spec) toward `target`.
    pub fn update(&mut self, target: f64) -> f64 {
        if !self.initialized {
            self.current = target;
            self.initialized = true;
            return self.current;
        }

        let diff = target - self.current;
        let rate = (diff.abs() / self.config.full_pressure_diff).min(1.0);

        if self.pressure == 0.0 || self.pressure.signum() == diff.signum() || diff == 0.0 {
            self.pressure += diff.signum() * rate;
        } else {
            // Pressure disagrees with the new direction: drain toward zero
            // faster than it built.
            let drain = self.config.decay_multiplier * rate;
            if self.pressure.abs() <= drain {
                self.pressure = 0.0;
            } else {
                self.pressure -= self.pressure.signum() * drain;
            }
        }

        if self.pressure.abs() > self.config.pressure_cap_seconds {
            self.pressure = self.pressure.signum() * self.config.pressure_cap_seconds;
        }

        let same_sign = diff * self.pressure > 0.0;
        if self.pressure.abs() > self.config.threshold_seconds && same_sign {
            let over = self.pressure.abs() - self.config.threshold_seconds;
            let max_rate = self.config.rate_accel * over * over;
            let step = diff.abs().min(max_rate);
            self.current += diff.signum() * step;
        }

        self.current
    }
}
