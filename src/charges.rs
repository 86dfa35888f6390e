//! Placement quota
//!
//! Charges replenish one at a time, one every `cooldown_ms`. `count` is
//! fractional: `2.5` means two whole charges are available and the third is
//! half-way through its cooldown.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of the placement quota.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charges {
    pub count: f64,
    pub max: u32,
    pub cooldown_ms: u64,
}

impl Charges {
    pub fn new(count: f64, max: u32, cooldown_ms: u64) -> Self {
        Self { count, max, cooldown_ms }
    }

    /// Whole charges available now.
    pub fn whole(&self) -> u32 {
        if self.count <= 0.0 {
            0
        } else {
            self.count.floor() as u32
        }
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.max as f64
    }

    /// Return true if the available charges are enough for `remaining` pixels,
    /// or if waiting could not make them so.
    pub fn can_proceed(&self, remaining: usize) -> bool {
        self.whole() as usize >= remaining || self.is_full()
    }

    /// Spend `n` charges after a successful placement.
    pub fn consume(&mut self, n: usize) {
        self.count = (self.count - n as f64).max(0.0);
    }

    /// Exact time until `target` whole charges are available.
    ///
    /// The first increment only needs the unfinished part of the current
    /// cooldown, `(1 - fraction) * cooldown`; every further charge needs a
    /// full cooldown.
    pub fn time_until(&self, target: u32) -> Duration {
        let have = self.whole();
        if target <= have {
            return Duration::ZERO;
        }
        let needed = (target - have) as f64;
        let fraction = self.count.max(0.0).fract();
        let cooldown = self.cooldown_ms as f64;
        let ms = (1.0 - fraction) * cooldown + (needed - 1.0) * cooldown;
        Duration::from_millis(ms.ceil() as u64)
    }

    /// Time until the next whole charge.
    pub fn time_until_next(&self) -> Duration {
        self.time_until(self.whole() + 1)
    }

    /// Charges needed before placing `remaining` pixels, capped at `max`.
    pub fn wait_target(&self, remaining: usize) -> u32 {
        (remaining.min(self.max as usize)) as u32
    }

    /// Advance the snapshot by `elapsed` of replenishment, capped at `max`.
    pub fn replenish(&mut self, elapsed: Duration) {
        if self.cooldown_ms == 0 {
            self.count = self.max as f64;
            return;
        }
        let gained = elapsed.as_millis() as f64 / self.cooldown_ms as f64;
        self.count = (self.count + gained).min(self.max as f64);
    }
}
