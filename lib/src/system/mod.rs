//! System state: the controller world value and the mode state machine.
//!
//! [`Controller`] owns everything the foreground call chain touches —
//! settings, planner, HAL, modal snapshot, backlash memory — plus an
//! `Arc`-shared [`RtRegister`] and [`StepPosition`] for the interrupt side.
//! Mode transitions are driven by drained realtime flags plus motion
//! completion; see [`Controller::update_state`].

pub(crate) mod overrides;

use std::sync::Arc;

use log::{debug, info};

use crate::config::Settings;
use crate::geometry::AxisMask;
use crate::hal::{CoolantState, Hal, OverrideControl, Planner, SpindleState};
use crate::motion::backlash::BacklashTracker;
use crate::rt::{RtRegister, StepPosition, EXEC_CYCLE_COMPLETE, EXEC_CYCLE_START,
    EXEC_FEED_HOLD, EXEC_MOTION_CANCEL, EXEC_SAFETY_DOOR, EXEC_SLEEP};
use crate::N_AXIS;

/// The machine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    Cycle = 1,
    Hold = 2,
    SafetyDoor = 3,
    Homing = 4,
    Jog = 5,
    CheckMode = 6,
    Alarm = 7,
    EStop = 8,
    Sleep = 9,
    ToolChange = 10,
}

impl State {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Cycle),
            2 => Some(Self::Hold),
            3 => Some(Self::SafetyDoor),
            4 => Some(Self::Homing),
            5 => Some(Self::Jog),
            6 => Some(Self::CheckMode),
            7 => Some(Self::Alarm),
            8 => Some(Self::EStop),
            9 => Some(Self::Sleep),
            10 => Some(Self::ToolChange),
            _ => None,
        }
    }

    /// States with motion actively executing.
    #[inline]
    pub const fn in_motion(self) -> bool {
        matches!(self, Self::Cycle | Self::Homing | Self::Jog)
    }

    /// States that reject any g-code motion request with `SystemGClock`.
    #[inline]
    pub const fn gcode_locked(self) -> bool {
        matches!(self, Self::Alarm | Self::EStop | Self::Sleep)
    }
}

/// Step-generator control handshake flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepControl {
    /// A feed hold deceleration is in progress.
    pub execute_hold: bool,
    /// Exactly one special parking block is in flight; the normal planner
    /// consumer is paused.
    pub execute_sys_motion: bool,
    /// Finish the current block then stop (jog cancel).
    pub end_motion: bool,
    pub update_spindle_rpm: bool,
}

/// Sticky foreground flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SysFlags {
    pub probe_succeeded: bool,
    pub block_delete_enabled: bool,
    /// A feed hold arrived while holds were disabled; re-armed every drain
    /// until a cycle start cancels it or the disable clears.
    pub feed_hold_pending: bool,
    /// Skip the override controller (tool change, some canned passes).
    pub delay_overrides: bool,
    pub soft_limit: bool,
}

/// Two-phase spindle-stop override (HOLD only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpindleStopOverride {
    pub initiate: bool,
    pub enabled: bool,
    pub restore: bool,
}

/// Live override values, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrides {
    pub feed: u8,
    pub rapid: u8,
    pub spindle: u8,
    pub control: OverrideControl,
    pub spindle_stop: SpindleStopOverride,
}

/// Pending status-report payload requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportRequests {
    pub homed: bool,
    pub spindle: bool,
    pub coolant: bool,
    pub overrides: bool,
}

/// Probe monitor state, armed for the duration of a probing motion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeState {
    #[default]
    Off,
    Active,
}

/// The process-wide mutable record, foreground-owned.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub state: State,
    /// Set only by the reset path; unwinds every busy loop.
    pub abort: bool,
    pub cancel: bool,
    /// While set, the foreground parks in the suspend loop.
    pub suspend: bool,
    pub flags: SysFlags,
    pub step_control: StepControl,
    pub overrides: Overrides,
    /// Axes homed since the last power loss. Always a subset of the
    /// configured homing mask.
    pub homed: AxisMask,
    pub probe_position: [i32; N_AXIS],
    pub probe_state: ProbeState,
    pub report: ReportRequests,
}

/// Modal g-code snapshot shared with the external parser.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GcState {
    pub spindle: SpindleState,
    pub spindle_rpm: f32,
    pub coolant: CoolantState,
    pub distance_incremental: bool,
    pub override_ctrl: OverrideControl,
    pub tool_change: bool,
}

/// The owned world value threaded through the foreground call chain.
pub struct Controller<H: Hal, P: Planner> {
    pub hal: H,
    pub planner: P,
    pub settings: Settings,
    pub sys: SystemState,
    pub gc: GcState,
    /// ISR-shared realtime event register.
    pub rt: Arc<RtRegister>,
    /// ISR-shared machine step position.
    pub position: Arc<StepPosition>,
    pub(crate) backlash: BacklashTracker,
    /// Single-producer single-consumer user message slot; a new message
    /// replaces an unshown one.
    pub(crate) message: Option<String>,
    /// Injected out-of-band command slot.
    pub(crate) xcommand: String,
    /// The current input line is preserve-verbatim (`$` line or comment).
    pub(crate) keep_rt_commands: bool,
    /// Millisecond mark of the last foreground activity, for the sleep timer.
    pub(crate) idle_mark: Option<u32>,
}

impl<H: Hal, P: Planner> Controller<H, P> {
    pub fn new(hal: H, planner: P, mut settings: Settings) -> Self {
        settings.sanitize();

        let overrides = Overrides {
            feed: settings.overrides.feed_default,
            rapid: settings.overrides.rapid_default,
            spindle: settings.overrides.spindle_default,
            control: OverrideControl::default(),
            spindle_stop: SpindleStopOverride::default(),
        };

        let sys = SystemState {
            state: State::Idle,
            abort: false,
            cancel: false,
            suspend: false,
            flags: SysFlags {
                block_delete_enabled: settings.block_delete_enabled,
                ..SysFlags::default()
            },
            step_control: StepControl::default(),
            overrides,
            homed: AxisMask::NONE,
            probe_position: [0; N_AXIS],
            probe_state: ProbeState::Off,
            report: ReportRequests::default(),
        };

        let position = Arc::new(StepPosition::new());
        let backlash = BacklashTracker::new(&settings, &position.snapshot());

        Self {
            hal,
            planner,
            settings,
            sys,
            gc: GcState::default(),
            rt: Arc::new(RtRegister::new()),
            position,
            backlash,
            message: None,
            xcommand: String::new(),
            keep_rt_commands: false,
            idle_mark: None,
        }
    }

    /// Transition the mode and publish it for the interrupt side.
    pub fn set_state(&mut self, state: State) {
        if self.sys.state != state {
            debug!("state {:?} -> {:?}", self.sys.state, state);
            self.sys.state = state;
            self.rt.publish_state(state);
        }
    }

    /// Re-seed planner and backlash memory from the machine step position.
    /// The external parser must resync its own position alongside this.
    pub fn sync_position(&mut self) {
        let steps = self.position.snapshot();
        self.planner.sync_position(&steps);
        self.backlash.sync(&steps, &self.settings);
    }

    /// Queue a user-visible message for display at the next realtime
    /// checkpoint. A pending unshown message is replaced.
    pub fn post_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Apply drained state-transition flags. Reports, stop and reset have
    /// already been peeled off by the realtime executor.
    pub(crate) fn update_state(&mut self, rt_exec: u16) {
        if rt_exec & EXEC_SAFETY_DOOR != 0 {
            self.door_event();
        }
        if rt_exec & EXEC_MOTION_CANCEL != 0 {
            self.motion_cancel_event();
        }
        if rt_exec & EXEC_FEED_HOLD != 0 {
            self.feed_hold_event();
        }
        if rt_exec & EXEC_SLEEP != 0 {
            self.sleep_event();
        }
        if rt_exec & EXEC_CYCLE_COMPLETE != 0 {
            self.cycle_complete_event();
        }
        if rt_exec & EXEC_CYCLE_START != 0 {
            self.cycle_start_event();
        }
    }

    fn door_event(&mut self) {
        match self.sys.state {
            State::Idle => {
                if !self.settings.safety_door_ignore_when_idle {
                    self.sys.suspend = true;
                    self.set_state(State::SafetyDoor);
                }
            }
            State::Cycle | State::Hold | State::Jog => {
                self.sys.suspend = true;
                self.sys.step_control.execute_hold = true;
                self.set_state(State::SafetyDoor);
            }
            // A door mid-homing aborts the cycle outright.
            State::Homing => self.motion_reset(),
            _ => {}
        }
    }

    fn motion_cancel_event(&mut self) {
        if self.sys.state == State::Jog {
            self.sys.step_control.end_motion = true;
            self.sys.cancel = true;
        }
    }

    fn feed_hold_event(&mut self) {
        match self.sys.state {
            State::Cycle => {
                if self.sys.overrides.control.feed_hold_disable {
                    self.sys.flags.feed_hold_pending = true;
                } else {
                    self.sys.suspend = true;
                    self.sys.step_control.execute_hold = true;
                    self.set_state(State::Hold);
                }
            }
            State::Jog => self.sys.step_control.end_motion = true,
            _ => {}
        }
    }

    fn sleep_event(&mut self) {
        info!("sleep timeout elapsed, parking");
        self.hal.spindle_set_state(SpindleState::OFF, 0.0);
        self.hal.coolant_set_state(CoolantState::OFF);
        self.hal.stepper_go_idle();
        self.hal.report_feedback(crate::hal::Feedback::SleepMode);
        self.set_state(State::Sleep);
    }

    fn cycle_complete_event(&mut self) {
        match self.sys.state {
            State::Cycle | State::Jog | State::Homing => {
                self.sys.step_control = StepControl::default();
                self.sys.suspend = false;
                self.set_state(State::Idle);
            }
            // Deceleration finished; stay suspended until resumed.
            State::Hold | State::SafetyDoor => {
                self.sys.step_control.execute_hold = false;
                self.sys.step_control.execute_sys_motion = false;
            }
            _ => {}
        }
    }

    fn cycle_start_event(&mut self) {
        // A cycle start cancels any pending tool change.
        self.gc.tool_change = false;

        match self.sys.state {
            State::Idle | State::ToolChange => {
                if self.planner.has_current_block() {
                    self.set_state(State::Cycle);
                    self.hal.stepper_prep_buffer();
                    self.hal.stepper_wake();
                }
            }
            State::Hold => self.resume_cycle(),
            State::SafetyDoor => {
                if !self.hal.control_state().safety_door_ajar {
                    self.resume_cycle();
                }
            }
            _ => {}
        }
    }

    fn resume_cycle(&mut self) {
        self.sys.suspend = false;
        self.sys.step_control.execute_hold = false;
        if self.planner.has_current_block() {
            self.set_state(State::Cycle);
            self.hal.stepper_prep_buffer();
            self.hal.stepper_wake();
        } else {
            self.set_state(State::Idle);
        }
    }
}
