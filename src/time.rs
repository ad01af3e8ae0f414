//! Injectable time sources.
//!
//! The statistics engine and governors need a monotonic clock for reading
//! timestamps and percentile windows, and a wall clock only for the
//! calendar-date check inside the forecast-excess ratchet (see
//! `governor::forecast_excess`). Both are behind a trait so tests can drive
//! deterministic timelines instead of `Instant::now()`/`Utc::now()`.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Source of monotonic instants and wall-clock dates.
pub trait Clock: Send + Sync {
    /// A monotonic instant, used for reading timestamps and window math.
    fn now(&self) -> Instant;
    /// The current wall-clock date, used only for the forecast-excess
    /// ratchet's "reset once per local date change" rule.
    fn today(&self) -> chrono::NaiveDate;
    /// The current time-of-day, used to locate the active forecast bucket.
    fn time_of_day(&self) -> chrono::NaiveTime;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn today(&self) -> chrono::NaiveDate {
        Utc::now().date_naive()
    }

    fn time_of_day(&self) -> chrono::NaiveTime {
        Utc::now().time()
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// `Instant` has no public constructor, so the fake clock is anchored to a
/// real `Instant` captured at construction time and advanced by `chrono`
/// durations from there. This keeps every test timestamp expressible as
/// "t=0, t=30s, t=6min" rather than wall-clock-dependent.
pub struct FakeClock {
    anchor: Instant,
    offset: std::sync::Mutex<chrono::Duration>,
    date: std::sync::Mutex<chrono::NaiveDate>,
    time_of_day: std::sync::Mutex<chrono::NaiveTime>,
}

impl FakeClock {
    pub fn new(start_date: chrono::NaiveDate) -> Self {
        Self {
            anchor: Instant::now(),
            offset: std::sync::Mutex::new(chrono::Duration::zero()),
            date: std::sync::Mutex::new(start_date),
            time_of_day: std::sync::Mutex::new(chrono::NaiveTime::MIN),
        }
    }

    /// Advance the monotonic clock by `d`.
    pub fn advance(&self, d: chrono::Duration) {
        let mut offset = self.offset.lock().unwrap();
        *offset = *offset + d;
    }

    /// Set the wall-clock date directly (used to simulate a midnight
    /// rollover without advancing the monotonic side).
    pub fn set_date(&self, date: chrono::NaiveDate) {
        *self.date.lock().unwrap() = date;
    }

    /// Set the wall-clock time-of-day directly.
    pub fn set_time_of_day(&self, time: chrono::NaiveTime) {
        *self.time_of_day.lock().unwrap() = time;
    }

    #[allow(dead_code)]
    fn elapsed_std(&self) -> std::time::Duration {
        self.offset
            .lock()
            .unwrap()
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.anchor + self.elapsed_std()
    }

    fn today(&self) -> chrono::NaiveDate {
        *self.date.lock().unwrap()
    }

    fn time_of_day(&self) -> chrono::NaiveTime {
        *self.time_of_day.lock().unwrap()
    }
}

#[derive(Clone)]
pub struct SharedClock(pub std::sync::Arc<dyn Clock>);

impl Clock for SharedClock {
    fn now(&self) -> Instant {
        self.0.now()
    }
    fn today(&self) -> chrono::NaiveDate {
        self.0.today()
    }
    fn time_of_day(&self) -> chrono::NaiveTime {
        self.0.time_of_day()
    }
}
