//! Hardware and planner interfaces.
//!
//! The core never touches hardware directly. Ports implement [`Hal`] for the
//! machine side (spindle, coolant, probe, limit switches, control pins,
//! stepper buffer control, stream I/O, clocks and report sinks) and
//! [`Planner`] for the trajectory planner's block buffer. Host-side tests
//! implement both with scripted recorders.

use crate::geometry::{AxisMask, Position};
use crate::system::State;
use crate::{Alarm, Status, N_AXIS};

/// Spindle drive state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpindleState {
    pub on: bool,
    pub ccw: bool,
    /// Feed is locked to spindle angular position (threading).
    pub synchronized: bool,
}

impl SpindleState {
    pub const OFF: SpindleState = SpindleState {
        on: false,
        ccw: false,
        synchronized: false,
    };
}

/// Coolant output state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoolantState {
    pub flood: bool,
    pub mist: bool,
}

impl CoolantState {
    pub const OFF: CoolantState = CoolantState {
        flood: false,
        mist: false,
    };
}

/// Snapshot of the control input pins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub reset: bool,
    pub cycle_start: bool,
    pub feed_hold: bool,
    pub safety_door_ajar: bool,
    pub e_stop: bool,
}

/// Motion classification flags carried with every planned line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionCondition {
    pub rapid: bool,
    /// Special single-block system motion (parking). The normal planner
    /// consumer is paused while one is in flight.
    pub system: bool,
    pub jog: bool,
    /// Compensation insert; the planner must not fold it into position
    /// reporting.
    pub backlash: bool,
    /// Feed rate is 1/duration instead of mm/min.
    pub inverse_time: bool,
    pub spindle: SpindleState,
    pub coolant: CoolantState,
}

/// Override permissions attached to a planned line, and the modal
/// override-control state they are snapshotted from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideControl {
    pub feed_disable: bool,
    pub spindle_disable: bool,
    pub feed_hold_disable: bool,
    /// Set while the modal state is pending a buffer sync.
    pub sync: bool,
}

/// One straight-line request conveyed to the planner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanLineData {
    /// mm/min, or 1/duration when `condition.inverse_time` is set.
    pub feed_rate: f32,
    pub spindle_rpm: f32,
    pub condition: MotionCondition,
    pub overrides: OverrideControl,
    /// Originating g-code line number, for reporting.
    pub line_number: u32,
}

impl PlanLineData {
    /// A rapid (seek) request.
    pub fn rapid() -> Self {
        Self {
            condition: MotionCondition {
                rapid: true,
                ..MotionCondition::default()
            },
            ..Self::default()
        }
    }
}

/// Delay flavors, so ports can pick the right wait primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayMode {
    Dwell,
    SysSuspend,
}

/// Operator feedback messages, formatted by the report sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    EStop,
    HomingCycleRequired,
    CheckLimits,
    AlarmLock,
    CriticalEvent,
    SleepMode,
}

/// The trajectory planner's block buffer, by interface.
///
/// The core only observes occupancy and pushes fully specified line
/// requests; feed/acceleration solving is the planner's business.
pub trait Planner {
    /// Queue one line request. Returns `false` when the request collapses to
    /// zero length and no block was created.
    fn push(&mut self, target: &Position, pl: &PlanLineData) -> bool;

    /// True when no block slot is free.
    fn is_full(&self) -> bool;

    /// True when at least one block is queued for execution.
    fn has_current_block(&self) -> bool;

    /// Drop all queued blocks and zero planner positions.
    fn reset(&mut self);

    /// Re-seed the planner position from the machine step vector.
    fn sync_position(&mut self, steps: &[i32; N_AXIS]);

    /// Apply new feed and rapid override percentages to queued motion.
    fn feed_override(&mut self, feed_percent: u8, rapid_percent: u8);
}

/// The machine side of the world.
///
/// Commanding methods take `&mut self`; pure pin reads take `&self`.
/// `poll_realtime` runs inside every realtime checkpoint and is the hook
/// ports use for driver housekeeping (and tests use for event injection).
pub trait Hal {
    // Spindle, coolant, probe.
    fn spindle_set_state(&mut self, state: SpindleState, rpm: f32);
    fn coolant_set_state(&mut self, state: CoolantState);
    fn probe_configure(&mut self, invert: bool);
    fn probe_triggered(&self) -> bool;

    // Stream I/O. `stream_suspend` returns whether reads were suspended
    // before the call.
    fn stream_read(&mut self) -> Option<u8>;
    fn stream_suspend(&mut self, suspend: bool) -> bool;
    fn stream_cancel_read(&mut self);

    // Control pins and limit switches.
    fn control_state(&self) -> ControlState;
    fn limits_enable(&mut self, hard: bool, homing: bool);
    fn limits_state(&self) -> AxisMask;

    /// Run one limit-seek homing move on an axis group: seek, pull off,
    /// leave the group at its home position. Returns success. Step timing
    /// and switch debouncing live below this interface.
    fn seek_home(&mut self, cycle: AxisMask) -> bool;

    // Stepper buffer control.
    fn stepper_wake(&mut self);
    fn stepper_go_idle(&mut self);
    fn stepper_prep_buffer(&mut self);
    fn stepper_reset(&mut self);
    /// Arm the segment buffer for the single special parking motion.
    fn stepper_parking_setup(&mut self);

    // Clocks and delays.
    fn millis(&self) -> u32;
    fn delay_sec(&mut self, seconds: f32, mode: DelayMode);

    /// Driver reset hook, invoked on system reset and stop.
    fn driver_reset(&mut self) {}

    /// Called from every realtime checkpoint with the current state.
    fn poll_realtime(&mut self, _state: State) {}

    // Report sinks. Formatting is the port's concern.
    fn report_status(&mut self, result: Result<(), Status>);
    fn report_alarm(&mut self, alarm: Alarm);
    fn report_feedback(&mut self, message: Feedback);
    fn report_realtime_status(&mut self);
    fn report_gcode_modes(&mut self) {}
    fn report_pid_log(&mut self) {}
    fn report_probe_result(&mut self, position: &Position, succeeded: bool) {
        let _ = (position, succeeded);
    }
    fn show_message(&mut self, message: &str) {
        let _ = message;
    }
}
