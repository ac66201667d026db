//! Canned drilling and threading cycles.
//!
//! Canned cycles expand a single g-code block into the full multi-move
//! sequence: pre-positioning rapids, pecked plunges with optional dwell and
//! spindle stop, retracts, and for threading the complete multi-pass
//! regression with entry/exit tapers and spindle-synchronized cuts. Every
//! generated move funnels through [`Controller::line`].

use crate::geometry::{Plane, Position};
use crate::hal::{Hal, PlanLineData, Planner, SpindleState};
use crate::system::{Controller, State};
use crate::{McResult, X_AXIS, Z_AXIS};

/// Where the drill retracts to between pecks and after the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractMode {
    /// G98: retract to the linear-axis position before the cycle.
    Previous,
    /// G99: retract to the R-plane.
    RPlane,
}

/// Drill cycle flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrillMotion {
    /// G81/G82: plunge to depth, retract. Dwell at the bottom when the
    /// cycle carries one.
    Plain,
    /// G73: peck with a short chip-break retract, full retract at depth.
    ChipBreak,
}

/// Canned drill cycle parameters, decoded from the g-code block.
#[derive(Debug, Clone)]
pub struct CannedCycle {
    pub retract_mode: RetractMode,
    /// R-plane, linear-axis machine coordinate.
    pub retract_position: f32,
    /// Linear-axis position before the cycle started.
    pub prev_position: f32,
    /// Hole position; the linear-axis component is the final depth.
    pub xyz: Position,
    /// Depth of cut per peck.
    pub delta: f32,
    /// Dwell at the bottom of each peck, seconds. Zero disables.
    pub dwell: f32,
    /// Stop the spindle at the bottom of each peck.
    pub spindle_off: bool,
    /// Retract at rapid rate rather than feed rate.
    pub rapid_retract: bool,
}

/// Thread cycle end-taper selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaperType {
    None,
    Entry,
    Exit,
    Both,
}

/// Threading cycle (G76) parameters.
#[derive(Debug, Clone)]
pub struct ThreadCycle {
    /// Thread pitch; the caller derives the synchronized feed from it.
    pub pitch: f32,
    /// Final Z position of the cut.
    pub z_final: f32,
    /// Thread peak offset from the drive line.
    pub peak: f32,
    /// Depth of the first pass.
    pub initial_depth: f32,
    /// Full thread depth.
    pub depth: f32,
    /// Depth regression exponent: pass depth grows as `pass^(1/degression)`.
    pub depth_degression: f32,
    /// Compound slide (infeed) angle, degrees; biases chip load to one flank.
    pub infeed_angle: f32,
    /// Extra passes at full depth.
    pub spring_passes: u32,
    pub end_taper_type: TaperType,
    /// Length of the entry/exit taper along Z.
    pub end_taper_length: f32,
    /// X rise of the main segment for tapered threads.
    pub main_taper_height: f32,
    /// +1 cuts toward positive X, -1 toward negative.
    pub cut_direction: f32,
}

/// Depth of cut for a given threading pass.
#[inline]
pub(crate) fn thread_doc(pass: u32, cut_depth: f32, inv_degression: f32) -> f32 {
    cut_depth * (pass as f32).powf(inv_degression)
}

/// Total pass count: regressed cutting passes until full depth, plus the
/// spring passes, plus one for the loop's pre-decrement.
pub(crate) fn thread_pass_count(
    initial_depth: f32,
    depth: f32,
    inv_degression: f32,
    spring_passes: u32,
) -> u32 {
    let mut passes = 0;
    loop {
        passes += 1;
        if thread_doc(passes, initial_depth, inv_degression) >= depth {
            break;
        }
    }
    passes + spring_passes + 1
}

impl<H: Hal, P: Planner> Controller<H, P> {
    /// Execute a canned drill cycle (plain, dwell or chip-break pecking).
    ///
    /// `position` is the current point; `target` carries the block's hole
    /// position and is left at the cycle's end point for the caller's
    /// position bookkeeping. `repeats` re-drills the hole, shifting by the
    /// block XY each round in incremental distance mode.
    pub fn canned_drill(
        &mut self,
        motion: DrillMotion,
        target: &mut Position,
        pl: &mut PlanLineData,
        position: &mut Position,
        plane: Plane,
        mut repeats: u32,
        canned: &mut CannedCycle,
    ) -> McResult {
        pl.condition.rapid = true;

        // Below the R-plane: clear it before moving in-plane.
        if position[plane.axis_linear] < canned.retract_position {
            position[plane.axis_linear] = canned.retract_position;
            self.line(position, pl)?;
        }

        // Rapid to the hole center at the higher of previous and R.
        *position = *target;
        position[plane.axis_linear] = canned.prev_position.max(canned.retract_position);
        self.line(position, pl)?;

        // Still above R: rapid down to it.
        if position[plane.axis_linear] > canned.retract_position {
            position[plane.axis_linear] = canned.retract_position;
            self.line(position, pl)?;
        }

        if canned.retract_mode == RetractMode::RPlane {
            canned.prev_position = canned.retract_position;
        }

        while repeats > 0 {
            repeats -= 1;

            let mut current_z = canned.retract_position;
            while current_z > canned.xyz[plane.axis_linear] {
                current_z -= canned.delta;
                if current_z < canned.xyz[plane.axis_linear] {
                    current_z = canned.xyz[plane.axis_linear];
                }

                pl.condition.rapid = false;
                position[plane.axis_linear] = current_z;
                self.line(position, pl)?;

                if canned.dwell > 0.0 {
                    self.dwell(canned.dwell)?;
                }
                if canned.spindle_off {
                    self.hal.spindle_set_state(SpindleState::OFF, 0.0);
                }

                position[plane.axis_linear] = match motion {
                    // Chip break: short retract while above final depth,
                    // full retract once the bottom is reached.
                    DrillMotion::ChipBreak => {
                        if position[plane.axis_linear] == canned.xyz[plane.axis_linear] {
                            canned.retract_position
                        } else {
                            position[plane.axis_linear] + self.settings.g73_retract
                        }
                    }
                    DrillMotion::Plain => canned.retract_position,
                };

                pl.condition.rapid = canned.rapid_retract;
                self.line(position, pl)?;

                if canned.spindle_off {
                    self.spindle_restore(pl.spindle_rpm)?;
                }
            }

            // Shift to the next hole in incremental distance mode.
            if repeats > 0 && self.gc.distance_incremental {
                position[plane.axis_0] += canned.xyz[plane.axis_0];
                position[plane.axis_1] += canned.xyz[plane.axis_1];
                position[plane.axis_linear] = canned.prev_position;
                self.line(position, pl)?;
            }
        }

        *target = *position;

        if canned.retract_mode == RetractMode::Previous
            && motion != DrillMotion::ChipBreak
            && target[plane.axis_linear] < canned.prev_position
        {
            pl.condition.rapid = true;
            target[plane.axis_linear] = canned.prev_position;
            self.line(&target, pl)?;
        }

        Ok(())
    }

    /// Execute a threading cycle (G76).
    ///
    /// Passes deepen by the degression law until full depth, followed by
    /// the spring passes. Every cut segment is bracketed: spindle sync and
    /// feed-hold-disable on just before, off immediately after; the
    /// caller's feed-hold-disable preference is restored for reposition
    /// moves.
    pub fn thread(
        &mut self,
        pl: &mut PlanLineData,
        position: &Position,
        thread: &mut ThreadCycle,
        feed_hold_disabled: bool,
    ) -> McResult {
        let inv_degression = 1.0 / thread.depth_degression;
        let mut pass: u32 = 1;
        let mut passes = thread_pass_count(
            thread.initial_depth,
            thread.depth,
            inv_degression,
            thread.spring_passes,
        );
        let mut doc = thread.initial_depth;
        let infeed_factor = thread.infeed_angle.to_radians().tan();

        let mut target = *position;

        let taper_count = match thread.end_taper_type {
            TaperType::None => 0.0,
            TaperType::Entry | TaperType::Exit => 1.0,
            TaperType::Both => 2.0,
        };

        // Tapers must oppose the cut direction whichever way Z runs.
        let mut thread_length = thread.z_final - position[Z_AXIS];
        if thread_length > 0.0 {
            thread.end_taper_length = -thread.end_taper_length;
        }
        thread_length += thread.end_taper_length * taper_count;

        // Scale the main taper so the tapered ends do not shorten the
        // constant-pitch segment's rise.
        if thread.main_taper_height != 0.0 {
            thread.main_taper_height = thread.main_taper_height * thread_length
                / (thread_length - thread.end_taper_length * taper_count);
        }

        pl.condition.rapid = true;

        // Initial Z offset for the compound slide angle.
        if infeed_factor != 0.0 {
            target[Z_AXIS] += thread.depth * infeed_factor;
            self.line(&target, pl)?;
        }

        loop {
            passes -= 1;
            if passes == 0 {
                break;
            }

            let end_taper_factor = doc / thread.depth;
            let end_taper_depth = thread.depth * end_taper_factor;
            let end_taper_length = thread.end_taper_length * end_taper_factor;

            // Straight entry when no taper is configured.
            if thread.end_taper_type == TaperType::None {
                target[X_AXIS] += (thread.peak + doc) * thread.cut_direction;
                self.line(&target, pl)?;
            }

            pl.condition.rapid = false;
            pl.condition.spindle.synchronized = true;
            pl.overrides.feed_hold_disable = true;

            // Give the spindle-sync subsystem a beat to latch.
            self.dwell(0.01)?;

            // 1. Entry taper.
            if matches!(thread.end_taper_type, TaperType::Entry | TaperType::Both) {
                target[X_AXIS] += (thread.peak + doc - end_taper_depth) * thread.cut_direction;
                self.line(&target, pl)?;

                target[X_AXIS] += end_taper_depth * thread.cut_direction;
                target[Z_AXIS] -= end_taper_length;
                self.line(&target, pl)?;
            }

            // 2. Main segment.
            if thread_length != 0.0 {
                target[X_AXIS] += thread.main_taper_height * thread.cut_direction;
                target[Z_AXIS] += thread_length;
                self.line(&target, pl)?;
            }

            // 3. Exit taper.
            if matches!(thread.end_taper_type, TaperType::Exit | TaperType::Both) {
                target[X_AXIS] += end_taper_depth * thread.cut_direction;
                target[Z_AXIS] -= end_taper_length;
                self.line(&target, pl)?;
            }

            pl.condition.rapid = true;
            pl.condition.spindle.synchronized = false;

            // 4. Retract off the thread.
            target[X_AXIS] = position[X_AXIS];
            self.line(&target, pl)?;

            if passes > 1 {
                pass += 1;
                doc = thread_doc(pass, thread.initial_depth, inv_degression).min(thread.depth);

                // The reposition move honors the caller's hold preference.
                pl.overrides.feed_hold_disable = feed_hold_disabled;

                // 5. Back to start, offset for the remaining compound infeed.
                target[Z_AXIS] = position[Z_AXIS]
                    + if infeed_factor != 0.0 {
                        (thread.depth - doc) * infeed_factor
                    } else {
                        0.0
                    };
                self.line(&target, pl)?;
            }
        }

        Ok(())
    }

    /// Restart the spindle per the modal state once buffered motion has
    /// drained; used after spindle-off pecks.
    fn spindle_restore(&mut self, rpm: f32) -> McResult {
        if self.sys.state != State::CheckMode {
            self.buffer_synchronize()?;
            self.hal.spindle_set_state(self.gc.spindle, rpm);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) {
        assert!(
            (a - b).abs() <= 1e-3,
            "expected {:.4}, got {:.4}",
            b,
            a
        );
    }

    #[test]
    fn doc_regression_series() {
        // initial 0.2, degression 2.0: doc grows with the square root of
        // the pass number.
        let inv = 1.0 / 2.0;
        approx_eq(thread_doc(1, 0.2, inv), 0.2);
        approx_eq(thread_doc(2, 0.2, inv), 0.283);
        approx_eq(thread_doc(3, 0.2, inv), 0.346);
        approx_eq(thread_doc(4, 0.2, inv), 0.4);
        approx_eq(thread_doc(25, 0.2, inv), 1.0);
    }

    #[test]
    fn pass_count_includes_springs_and_sentinel() {
        // 25 regressed passes to reach depth 1.0, 2 springs, plus the
        // loop's pre-decrement sentinel.
        assert_eq!(thread_pass_count(0.2, 1.0, 0.5, 2), 28);
        // Degression 1.0 is linear: 0.25 -> 4 passes.
        assert_eq!(thread_pass_count(0.25, 1.0, 1.0, 0), 5);
    }

    #[test]
    fn first_pass_at_or_above_depth_is_single() {
        assert_eq!(thread_pass_count(1.0, 1.0, 1.0, 0), 2);
        assert_eq!(thread_pass_count(2.0, 1.0, 1.0, 0), 2);
    }
}
