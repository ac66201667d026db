//! Motion gateway and supporting motions.
//!
//! [`Controller::line`] is the single funnel to the planner: every straight
//! line — user moves, arc segments, canned-cycle moves, jogs, backlash
//! inserts — passes through it, so the soft-limit check, the realtime
//! checkpoint and the buffer backpressure loop apply uniformly.

pub mod arc;
pub(crate) mod backlash;

use log::{info, warn};

use crate::geometry::Position;
use crate::hal::{
    CoolantState, DelayMode, Hal, MotionCondition, OverrideControl, PlanLineData, Planner,
    SpindleState,
};
use crate::rt::{EXEC_CYCLE_COMPLETE, EXEC_FEED_HOLD, EXEC_RESET};
use crate::system::{Controller, State};
use crate::{Alarm, McResult, N_AXIS, Status};

impl<H: Hal, P: Planner> Controller<H, P> {
    /// Execute linear motion in absolute millimeter coordinates.
    ///
    /// Feed rate is mm/min unless `condition.inverse_time` is set, in which
    /// case the motion must complete in `1/feed_rate` minutes.
    ///
    /// In order: soft-limit validation (skipped for jogs), CHECK-mode
    /// short-circuit, a realtime checkpoint, the backlash insert when the
    /// direction memory demands one, backpressure against the planner
    /// buffer, and finally the push. A zero-length move in laser mode with
    /// the spindle on applies the S-word synchronously so it is not lost.
    ///
    /// Returns `Err(Aborted)` when a system abort is observed at any of the
    /// suspension points.
    pub fn line(&mut self, target: &Position, pl: &PlanLineData) -> McResult {
        // Jogging handles its own limits; everything else is checked here so
        // all line motions are picked up, arc segments included.
        if !pl.condition.jog && self.settings.limits.soft_enabled {
            self.soft_limit_check(target);
        }

        // In check mode, validate only; the planner never sees the move.
        if self.sys.state == State::CheckMode {
            return Ok(());
        }

        self.execute_realtime()?;

        if self.backlash.is_enabled() {
            let backlash = self.settings.backlash;
            if let Some(shadow) = self.backlash.plan(target, &backlash) {
                let pl_backlash = PlanLineData {
                    condition: MotionCondition {
                        rapid: true,
                        backlash: true,
                        ..MotionCondition::default()
                    },
                    spindle_rpm: pl.spindle_rpm,
                    line_number: pl.line_number,
                    ..PlanLineData::default()
                };

                self.wait_planner_space()?;
                self.planner.push(&shadow, &pl_backlash);
            }
            self.backlash.commit(target);
        }

        self.wait_planner_space()?;

        if !self.planner.push(target, pl)
            && self.settings.laser_mode
            && pl.condition.spindle.on
            && !pl.condition.spindle.ccw
        {
            // Coincident position with an S-word while lasing: sync the
            // spindle setpoint instead of dropping it with the empty block.
            self.hal.spindle_set_state(pl.condition.spindle, pl.spindle_rpm);
        }

        Ok(())
    }

    /// Busy-wait for planner buffer space. A full buffer means we are well
    /// ahead of the machine, so keep the cycle running and service realtime
    /// events until a slot frees.
    pub(crate) fn wait_planner_space(&mut self) -> McResult {
        while self.planner.is_full() {
            self.auto_cycle_start();
            self.execute_realtime()?;
        }
        Ok(())
    }

    fn soft_limit_check(&mut self, target: &Position) {
        if self.settings.limits.within_travel(target) {
            return;
        }

        warn!(
            "soft limit violation at [{:.3}, {:.3}, {:.3}]",
            target[0], target[1], target[2]
        );
        self.sys.flags.soft_limit = true;

        // Mid-cycle the motion must be brought to a controlled stop before
        // the abort, or position is lost.
        if self.sys.state == State::Cycle {
            self.rt.set_state_flags(EXEC_FEED_HOLD);
            let _ = self.execute_realtime();
            self.motion_reset();
        }

        self.rt.set_alarm(Alarm::SoftLimit);
    }

    /// Execute a dwell: drain all buffered motion, then pause.
    pub fn dwell(&mut self, seconds: f32) -> McResult {
        if self.sys.state != State::CheckMode {
            self.buffer_synchronize()?;
            self.hal.delay_sec(seconds, DelayMode::Dwell);
        }
        Ok(())
    }

    /// Validate and execute a jog motion.
    ///
    /// Spindle and coolant keep running with overrides active; feed
    /// override is disabled for the jog itself. Soft limits either clamp
    /// the target into the envelope or reject the jog, per configuration.
    pub fn jog_execute(
        &mut self,
        target: &Position,
        feed_rate: f32,
        line_number: u32,
    ) -> Result<(), Status> {
        let pl = PlanLineData {
            feed_rate,
            line_number,
            condition: MotionCondition {
                jog: true,
                ..MotionCondition::default()
            },
            overrides: OverrideControl {
                feed_disable: true,
                ..OverrideControl::default()
            },
            ..PlanLineData::default()
        };

        let mut target = *target;
        if self.settings.limits.jog_soft_limited {
            self.apply_jog_limits(&mut target);
        } else if self.settings.limits.soft_enabled
            && !self.settings.limits.within_travel(&target)
        {
            return Err(Status::TravelExceeded);
        }

        // Valid jog. Plan, set state and start; an abort surfaces through
        // the protocol loop.
        let _ = self.line(&target, &pl);
        if matches!(self.sys.state, State::Idle | State::ToolChange)
            && self.planner.has_current_block()
        {
            self.set_state(State::Jog);
            self.hal.stepper_prep_buffer();
            self.hal.stepper_wake();
        }

        Ok(())
    }

    fn apply_jog_limits(&self, target: &mut Position) {
        let limits = &self.settings.limits;
        for idx in 0..N_AXIS {
            target[idx] = target[idx].clamp(limits.travel_min[idx], limits.travel_max[idx]);
        }
    }

    /// Plan and execute the single special parking motion, independent of
    /// the main planner consumer.
    pub fn parking_motion(&mut self, target: &Position, pl: &PlanLineData) -> bool {
        if self.sys.abort {
            return false;
        }

        if self.planner.push(target, pl) {
            self.sys.step_control.execute_sys_motion = true;
            // Allow the parking motion to run even under an active hold.
            self.sys.step_control.end_motion = false;
            self.hal.stepper_parking_setup();
            self.hal.stepper_prep_buffer();
            self.hal.stepper_wake();
            true
        } else {
            // Nothing to move; flag the cycle as completed.
            self.rt.set_state_flags(EXEC_CYCLE_COMPLETE);
            false
        }
    }

    /// Swap the modal override-control state once all queued motion has
    /// finished.
    pub fn override_ctrl_update(&mut self, control: OverrideControl) -> McResult {
        self.buffer_synchronize()?;
        if !self.sys.abort {
            self.sys.overrides.control = control;
        }
        Ok(())
    }

    /// Ready the system for reset: post `EXEC_RESET` and kill every active
    /// process. When reset interrupts motion the position is considered
    /// lost and an alarm is latched.
    ///
    /// Safe to call from the realtime ingest path; only the first caller
    /// acts.
    pub fn motion_reset(&mut self) {
        if self.rt.test(EXEC_RESET) {
            return;
        }

        info!("system reset requested");
        self.rt.set_state_flags(EXEC_RESET);

        self.hal.spindle_set_state(SpindleState::OFF, 0.0);
        self.hal.coolant_set_state(CoolantState::OFF);
        self.hal.driver_reset();
        self.hal.stream_suspend(false);

        let step_control = self.sys.step_control;
        if self.sys.state.in_motion()
            || step_control.execute_hold
            || step_control.execute_sys_motion
        {
            if self.sys.state != State::Homing {
                self.rt.set_alarm(Alarm::AbortCycle);
            } else if self.rt.alarm().is_none() {
                self.rt.set_alarm(Alarm::HomingFailReset);
            }
            // Force kill; position has likely been lost.
            self.hal.stepper_go_idle();
        }

        if self.hal.control_state().e_stop {
            self.rt.set_alarm(Alarm::EStop);
        }
    }
}
