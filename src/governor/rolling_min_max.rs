//! 60-slot circular buffer keyed by minute-of-hour, tracking (min, max) per
//! slot. See spec §4.2.3.

const SLOTS: usize = 60;

#[derive(Debug, Clone, Copy)]
struct Slot {
    min: f64,
    max: f64,
}

#[derive(Debug, Clone)]
pub struct RollingMinMax {
    slots: [Option<Slot>; SLOTS],
    current_minute: Option<u32>,
}

impl Default for RollingMinMax {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingMinMax {
    pub fn new() -> Self {
        Self {
            slots: [None; SLOTS],
            current_minute: None,
        }
    }

    /// Record a sample `v` observed during minute-of-hour `minute` (0..60).
    pub fn update(&mut self, v: f64, minute: u32) {
        let minute = minute % SLOTS as u32;

        match self.current_minute {
            None => {
                self.slots[minute as usize] = Some(Slot { min: v, max: v });
            }
            Some(cur) if cur == minute => {
                let slot = self.slots[minute as usize].get_or_insert(Slot { min: v, max: v });
                slot.min = slot.min.min(v);
                slot.max = slot.max.max(v);
            }
            Some(cur) => {
                // Clear every slot strictly between the last-seen minute
                // and the new one (wrapping), then seed the new slot fresh.
                let mut m = (cur + 1) % SLOTS as u32;
                while m != minute {
                    self.slots[m as usize] = None;
                    m = (m + 1) % SLOTS as u32;
                }
                self.slots[minute as usize] = Some(Slot { min: v, max: v });
            }
        }
        self.current_minute = Some(minute);
    }

    pub fn min(&self) -> f64 {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.min)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
            .unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.max)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
            .unwrap_or(0.0)
    }
}
