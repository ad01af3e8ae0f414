//! Forecast-excess ratchet: derives a target export power that, if held
//! until solar ends, would exactly discharge the battery's predicted
//! end-of-day excess. See spec §4.2.4.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForecastExcessConfig {
    pub inverters: u32,
    pub per_inverter_watts: f64,
    pub solar_multiplier: f64,
}

impl ForecastExcessConfig {
    pub fn max_inverter_watts(&self) -> f64 {
        self.inverters as f64 * self.per_inverter_watts
    }
}

/// A single 30-minute forecast bucket.
#[derive(Debug, Clone, Copy)]
pub struct ForecastPeriod {
    pub start: NaiveTime,
    pub pv_estimate_kw: f64,
}

impl ForecastPeriod {
    const DURATION_HOURS: f64 = 0.5;

    fn end(&self) -> NaiveTime {
        self.start + chrono::Duration::minutes(30)
    }

    fn energy_kwh(&self) -> f64 {
        self.pv_estimate_kw * Self::DURATION_HOURS
    }
}

#[derive(Debug, Clone)]
pub struct ForecastExcess {
    config: ForecastExcessConfig,
    current_target: Option<f64>,
    last_date: Option<NaiveDate>,
}

impl ForecastExcess {
    pub fn new(config: ForecastExcessConfig) -> Self {
        Self {
            config,
            current_target: None,
            last_date: None,
        }
    }

    pub fn current_target(&self) -> f64 {
        self.current_target.unwrap_or(0.0)
    }

    /// Recompute the target given a fresh forecast and battery state.
    /// `forecast` must be sorted by `start` ascending and cover `now`.
    /// `forecast_remaining_wh` is the externally-supplied remaining-today
    /// solar estimate; it is not re-derived from `forecast` because the
    /// two sources need not agree exactly (spec §4.2.4 step 5).
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        now: NaiveTime,
        today: NaiveDate,
        forecast: &[ForecastPeriod],
        forecast_remaining_wh: f64,
        available_wh: f64,
        capacity_wh: f64,
    ) -> f64 {
        let max_inverter_watts = self.config.max_inverter_watts();

        let current_bucket = forecast
            .iter()
            .find(|p| p.start <= now && now < p.end());
        let current_pv = current_bucket.map(|p| p.pv_estimate_kw).unwrap_or(0.0);
        if current_pv == 0.0 {
            return 0.0;
        }

        let min_kw = max_inverter_watts / (self.config.solar_multiplier * 1000.0);

        let solar_end = forecast
            .iter()
            .filter(|p| p.pv_estimate_kw > min_kw)
            .map(|p| p.end())
            .max();

        let Some(solar_end) = solar_end else {
            return 0.0;
        };

        let hours_remaining = (solar_end - now).num_seconds() as f64 / 3600.0;
        if hours_remaining <= 0.0 {
            return 0.0;
        }

        let after_cutoff_kwh: f64 = forecast
            .iter()
            .filter(|p| p.start >= solar_end)
            .map(|p| p.energy_kwh())
            .sum();

        let expected_solar_wh =
            self.config.solar_multiplier * (forecast_remaining_wh - 1000.0 * after_cutoff_kwh);

        let excess_wh = available_wh + expected_solar_wh - capacity_wh;
        if excess_wh <= 0.0 {
            return 0.0;
        }

        // Handoff window: below one hour remaining, lerp the target linearly
        // toward 0 as solar_end approaches rather than holding the full
        // excess_wh/hours_remaining rate (which would blow up near zero).
        let optimal = if hours_remaining < 1.0 {
            excess_wh * hours_remaining
        } else {
            excess_wh / hours_remaining
        };

        match self.last_date {
            Some(last) if last == today => {
                self.current_target = Some(self.current_target.unwrap_or(optimal).min(optimal));
            }
            _ => {
                self.current_target = Some(optimal);
                self.last_date = Some(today);
            }
        }

        self.current_target.unwrap_or(0.0).min(max_inverter_watts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn four_flat_periods() -> Vec<ForecastPeriod> {
        vec![
            ForecastPeriod {
                start: time(10, 0),
                pv_estimate_kw: 2.0,
            },
            ForecastPeriod {
                start: time(10, 30),
                pv_estimate_kw: 2.0,
            },
            ForecastPeriod {
                start: time(11, 0),
                pv_estimate_kw: 2.0,
            },
            ForecastPeriod {
                start: time(11, 30),
                pv_estimate_kw: 2.0,
            },
        ]
    }

    /// Scenario 4 from spec §8, first data point: target at 10:00 = 1000W.
    #[test]
    fn ten_oclock_target_matches_worked_example() {
        let config = ForecastExcessConfig {
            inverters: 4,
            per_inverter_watts: 250.0,
            solar_multiplier: 1.0,
        };
        let mut fe = ForecastExcess::new(config);
        let target = fe.update(time(10, 0), date(), &four_flat_periods(), 4000.0, 8000.0, 10000.0);
        assert_eq!(target, 1000.0);
    }

    #[test]
    fn night_bucket_returns_zero() {
        let config = ForecastExcessConfig {
            inverters: 4,
            per_inverter_watts: 250.0,
            solar_multiplier: 1.0,
        };
        let mut fe = ForecastExcess::new(config);
        let periods = vec![ForecastPeriod {
            start: time(22, 0),
            pv_estimate_kw: 0.0,
        }];
        assert_eq!(fe.update(time(22, 0), date(), &periods, 0.0, 5000.0, 10000.0), 0.0);
    }

    #[test]
    fn target_is_non_increasing_within_a_day_and_resets_on_date_change() {
        let config = ForecastExcessConfig {
            inverters: 4,
            per_inverter_watts: 250.0,
            solar_multiplier: 1.0,
        };
        let mut fe = ForecastExcess::new(config);
        let periods = four_flat_periods();
        let first = fe.update(time(10, 0), date(), &periods, 4000.0, 8000.0, 10000.0);

        // A recomputation later the same day with a much larger nominal
        // optimal (e.g. more available energy) must not raise the ratchet.
        let second = fe.update(time(10, 15), date(), &periods, 3000.0, 9900.0, 10000.0);
        assert!(second <= first);

        // A new calendar day is free to pick a fresh, higher value.
        let tomorrow = date().succ_opt().unwrap();
        let third = fe.update(time(10, 0), tomorrow, &periods, 4000.0, 8000.0, 10000.0);
        assert_eq!(third, first);
    }

    /// Inside the sub-1h handoff window the target decays toward 0 as
    /// `solar_end` approaches, rather than holding a constant rate.
    #[test]
    fn handoff_window_decays_toward_zero_as_solar_end_approaches() {
        let config = ForecastExcessConfig {
            inverters: 4,
            per_inverter_watts: 250.0,
            solar_multiplier: 1.0,
        };
        let periods = vec![ForecastPeriod {
            start: time(11, 0),
            pv_estimate_kw: 2.0,
        }];

        // excess_wh = available(1800) + expected_solar(0) - capacity(1000) = 800
        // at 11:24, hours_remaining = 0.1h.
        let mut near = ForecastExcess::new(config);
        let near_target = near.update(time(11, 24), date(), &periods, 0.0, 1800.0, 1000.0);
        assert_eq!(near_target, 80.0);

        // At 11:23.4 (hours_remaining = 0.11h) the target should be larger
        // than at 11:24 (hours_remaining = 0.1h): it keeps decaying, not
        // sitting flat at excess_wh regardless of how close to solar_end.
        let mut further = ForecastExcess::new(config);
        let further_target = further.update(
            time(11, 23) + chrono::Duration::seconds(36),
            date(),
            &periods,
            0.0,
            1800.0,
            1000.0,
        );
        assert!(further_target > near_target);
    }
}
