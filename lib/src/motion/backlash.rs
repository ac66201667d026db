//! Per-axis backlash direction memory and compensation planning.

use crate::config::Settings;
use crate::geometry::{steps_to_mpos, AxisMask, Position};
use crate::N_AXIS;

/// Backlash below this is treated as disabled.
const BACKLASH_EPSILON: f32 = 1e-4;

/// Tracks the last commanded target and the current travel direction per
/// axis, and plans the compensating rapid insert on direction reversal.
#[derive(Debug, Clone)]
pub(crate) struct BacklashTracker {
    /// Shadow previous target; compensation shifts it by the slack before
    /// the commanded move is emitted.
    prev_target: Position,
    /// Axes currently travelling in the negative direction.
    dir_negative: AxisMask,
    enabled: AxisMask,
}

impl BacklashTracker {
    pub fn new(settings: &Settings, steps: &[i32; N_AXIS]) -> Self {
        let mut enabled = AxisMask::NONE;
        for idx in 0..N_AXIS {
            if settings.backlash[idx] > BACKLASH_EPSILON {
                enabled.set(idx);
            }
        }

        // Seed direction from the homing direction so the first move toward
        // home does not inject compensation.
        let dir_negative = !settings.homing.dir_mask;

        Self {
            prev_target: steps_to_mpos(steps, &settings.steps_per_mm),
            dir_negative,
            enabled,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        !self.enabled.is_empty()
    }

    /// Reset the previous target from the current machine step position.
    pub fn sync(&mut self, steps: &[i32; N_AXIS], settings: &Settings) {
        self.prev_target = steps_to_mpos(steps, &settings.steps_per_mm);
    }

    /// Plan compensation for a commanded move. Updates direction memory and
    /// shifts the shadow previous target by the slack on every axis that
    /// reverses; returns the shifted point when any axis needs an insert.
    pub fn plan(&mut self, target: &Position, backlash: &[f32; N_AXIS]) -> Option<Position> {
        let mut compensate = false;

        for idx in self.enabled.iter() {
            if target[idx] > self.prev_target[idx] {
                if self.dir_negative.has(idx) {
                    self.dir_negative.clear(idx);
                    self.prev_target[idx] += backlash[idx];
                    compensate = true;
                }
            } else if target[idx] < self.prev_target[idx] && !self.dir_negative.has(idx) {
                self.dir_negative.set(idx);
                self.prev_target[idx] -= backlash[idx];
                compensate = true;
            }
        }

        compensate.then_some(self.prev_target)
    }

    /// Record the commanded target after the move has been emitted.
    pub fn commit(&mut self, target: &Position) {
        self.prev_target = *target;
    }
}
