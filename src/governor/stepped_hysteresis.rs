//! Stepped hysteresis: converts a continuous input into an integer step
//! count in `[0, N]` with non-overlapping enter/exit thresholds so that
//! small oscillations around a boundary don't chatter the output.

use serde::{Deserialize, Serialize};

/// Configuration for a `SteppedHysteresis`. Cheap to clone; lives in the
/// static percentile/arbitration configuration, not per-tick state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HysteresisConfig {
    pub steps: u32,
    pub ascending: bool,
    pub in_start: f64,
    pub in_end: f64,
    pub out_start: f64,
    pub out_end: f64,
}

impl HysteresisConfig {
    pub fn new(steps: u32, ascending: bool, in_band: (f64, f64), out_band: (f64, f64)) -> Self {
        Self {
            steps,
            ascending,
            in_start: in_band.0,
            in_end: in_band.1,
            out_start: out_band.0,
            out_end: out_band.1,
        }
    }

    fn threshold(&self, start: f64, end: f64, step: u32) -> f64 {
        // Linear interpolation for step i in [1, N]: i=1 sits exactly at
        // `start`, and the spacing between successive thresholds is
        // (end - start) / steps, so `end` itself is approached but not
        // reached by threshold N (the last threshold is one step short).
        let n = self.steps.max(1) as f64;
        start + (end - start) * ((step - 1) as f64) / n
    }

    fn crossed(&self, value: f64, threshold: f64) -> bool {
        if self.ascending {
            value >= threshold
        } else {
            value < threshold
        }
    }

    fn count_crossed(&self, value: f64, start: f64, end: f64) -> u32 {
        (1..=self.steps)
            .filter(|&i| self.crossed(value, self.threshold(start, end, i)))
            .count() as u32
    }
}

/// Stateful step counter driven by `HysteresisConfig`.
#[derive(Debug, Clone)]
pub struct SteppedHysteresis {
    config: HysteresisConfig,
    current: u32,
}

impl SteppedHysteresis {
    pub fn new(config: HysteresisConfig) -> Self {
        Self { config, current: 0 }
    }

    pub fn with_initial(config: HysteresisConfig, initial: u32) -> Self {
        Self {
            current: initial.min(config.steps),
            config,
        }
    }

    /// Advance the step count for a new `value` reading. Returns the step
    /// count after the update.
    pub fn update(&mut self, value: f64) -> u32 {
        let in_count = self
            .config
            .count_crossed(value, self.config.in_start, self.config.in_end);
        let out_count = self
            .config
            .count_crossed(value, self.config.out_start, self.config.out_end);

        if self.current > out_count {
            self.current = out_count;
        } else if self.current < in_count {
            self.current = in_count;
        }
        self.current
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn steps(&self) -> u32 {
        self.config.steps
    }
}
