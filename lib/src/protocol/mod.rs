//! Main protocol loop and realtime execution.
//!
//! The loop pumps stream bytes through the realtime ingest, assembles
//! filtered lines (whitespace stripped, comments removed, letters
//! uppercased outside `$` lines), and dispatches them to the system-command
//! handler, the user-command handler or the g-code parser. Between lines it
//! services the realtime event register; `execute_realtime` is the only
//! legal suspension point and every busy-wait in the crate runs it.

use log::{error, info};

use crate::hal::{CoolantState, Feedback, Hal, Planner, SpindleState};
use crate::rt::{
    EXEC_CYCLE_START, EXEC_FEED_HOLD, EXEC_GCODE_REPORT, EXEC_MOTION_CANCEL, EXEC_PID_REPORT,
    EXEC_RESET, EXEC_SAFETY_DOOR, EXEC_SLEEP, EXEC_STATUS_REPORT, EXEC_STOP,
};
use crate::system::{Controller, ProbeState, ReportRequests, State, StepControl, SysFlags};
use crate::{Aborted, Alarm, McResult, Status};

/// Maximum accepted line length, terminator excluded.
pub const LINE_BUFFER_SIZE: usize = 256;

/// Why the protocol loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// System abort: re-initialize and re-enter.
    Reset,
    /// Explicit exit request: shut down.
    Exit,
}

/// External line handlers: the `$` system-command surface, the `[` user
/// command surface, and the g-code parser.
///
/// Handlers receive the controller and may drive motion through it. After
/// a homing command the handler must resync the parser's position, mirroring
/// [`Controller::sync_position`].
pub trait Dispatch<H: Hal, P: Planner> {
    /// Execute a `$` system line (`$H` homing, `$J=` jogging, settings...).
    fn system_command(&mut self, core: &mut Controller<H, P>, line: &str) -> Result<(), Status>;

    /// Execute a `[...]` user command line.
    fn user_command(&mut self, core: &mut Controller<H, P>, line: &str) -> Result<(), Status> {
        let _ = (core, line);
        Err(Status::Unhandled)
    }

    /// Parse and execute one g-code block. `message` carries a captured
    /// `(MSG,...)` comment for display.
    fn gcode_block(
        &mut self,
        core: &mut Controller<H, P>,
        line: &str,
        message: Option<&str>,
    ) -> Result<(), Status>;

    /// Run the startup script after a clean cold start.
    fn startup_script(&mut self, core: &mut Controller<H, P>) {
        let _ = core;
    }
}

#[derive(Default)]
struct MsgCapture {
    /// Progress through the `(MSG,` prefix; 5 = capturing the body.
    tracker: u8,
    buf: String,
    show: bool,
}

/// Input filter state: strips whitespace and comments, tracks overflow and
/// the block-delete switch, and uppercases everything outside `$` lines.
#[derive(Default)]
struct LineAssembler {
    line: String,
    eol: Option<u8>,
    overflow: bool,
    comment_paren: bool,
    comment_semi: bool,
    block_delete: bool,
    /// `$` line: preserve case and spaces (passwords and the like).
    nocaps: bool,
    msg: MsgCapture,
}

enum Assembled {
    Pending,
    Line,
}

impl LineAssembler {
    fn push(&mut self, c: u8, block_delete_enabled: bool, keep_rt: &mut bool) -> Assembled {
        if c == b'\n' || c == b'\r' {
            // Swallow the second half of a CRLF (or LFCR) pair so it does
            // not produce a double response.
            if self.line.is_empty() && !self.overflow && self.eol.is_some_and(|prev| prev != c) {
                self.eol = None;
                return Assembled::Pending;
            }
            self.eol = Some(c);
            return Assembled::Line;
        }

        let discard = self.overflow || self.comment_paren || self.comment_semi || self.block_delete;
        let ws_limit = if self.nocaps { b' ' - 1 } else { b' ' };

        if c <= ws_limit || discard {
            // Inside a parenthesis comment: track and capture `(MSG,` text.
            if c >= b' ' && self.comment_paren {
                const MSG_PREFIX: &[u8] = b"(MSG,";
                if self.msg.tracker == 5 {
                    if c != b')' {
                        self.msg.buf.push(c as char);
                    }
                } else if self.msg.tracker > 0
                    && c.to_ascii_uppercase() == MSG_PREFIX[self.msg.tracker as usize]
                {
                    self.msg.tracker += 1;
                } else {
                    self.msg.tracker = 0;
                }

                if c == b')' {
                    // End of comment; resume the line.
                    self.comment_paren = false;
                    *keep_rt = false;
                    self.msg.show = self.msg.show || self.msg.tracker == 5;
                }
            }
            return Assembled::Pending;
        }

        match c {
            b'/' if self.line.is_empty() => self.block_delete = block_delete_enabled,
            // Never uppercase system commands, they can carry passwords.
            b'$' if self.line.is_empty() => {
                self.nocaps = true;
                *keep_rt = true;
            }
            b'(' => {
                if !*keep_rt {
                    self.comment_paren = !self.comment_semi;
                    if self.comment_paren {
                        self.msg.tracker = 1;
                        self.msg.buf.clear();
                        *keep_rt = true;
                    }
                }
            }
            b';' => {
                // Comment to end of line.
                if !*keep_rt {
                    self.comment_semi = !self.comment_paren;
                    if self.comment_semi {
                        *keep_rt = true;
                    }
                }
            }
            _ => {}
        }

        if !(self.overflow || self.comment_paren || self.comment_semi || self.block_delete) {
            if self.line.len() >= LINE_BUFFER_SIZE - 1 {
                self.overflow = true;
            } else if self.nocaps {
                self.line.push(c as char);
            } else {
                self.line.push(c.to_ascii_uppercase() as char);
            }
        }

        Assembled::Pending
    }

    fn reset_line(&mut self, keep_rt: &mut bool) {
        self.line.clear();
        self.overflow = false;
        self.comment_paren = false;
        self.comment_semi = false;
        self.block_delete = false;
        self.nocaps = false;
        self.msg = MsgCapture::default();
        *keep_rt = false;
    }
}

impl<H: Hal, P: Planner> Controller<H, P> {
    /// The primary loop. Returns on system abort or an explicit exit
    /// request; the embedder re-initializes and re-enters on
    /// [`LoopExit::Reset`].
    pub fn main_loop<D: Dispatch<H, P>>(&mut self, dispatch: &mut D, cold_start: bool) -> LoopExit {
        self.startup_gates(dispatch, cold_start);

        let mut assembler = LineAssembler::default();
        self.xcommand.clear();
        self.keep_rt_commands = false;

        loop {
            // Process incoming stream data as it becomes available.
            while let Some(c) = self.hal.stream_read() {
                if self.rt.take_discard_line() {
                    assembler.reset_line(&mut self.keep_rt_commands);
                }

                if self.process_byte(c) {
                    continue;
                }

                if let Assembled::Line =
                    assembler.push(c, self.sys.flags.block_delete_enabled, &mut self.keep_rt_commands)
                {
                    // Runtime command check point before dispatch.
                    if self.execute_realtime().is_err() {
                        return self.exit_kind();
                    }
                    self.dispatch_line(dispatch, &mut assembler);
                }
            }

            // Handle the injected out-of-band command slot.
            if !self.xcommand.is_empty() {
                let command = std::mem::take(&mut self.xcommand);
                if command.starts_with('$') {
                    // The status of an injected system line is intentionally
                    // not reported back.
                    let _ = dispatch.system_command(self, &command);
                } else if self.gcode_blocked() {
                    self.hal.report_status(Err(Status::SystemGClock));
                } else {
                    let _ = dispatch.gcode_block(self, &command, None);
                }
            }

            // Input drained: streaming has either filled the planner or
            // finished. Start any queued motion.
            self.auto_cycle_start();

            if self.execute_realtime().is_err() && self.sys.abort {
                return self.exit_kind();
            }

            self.sys.cancel = false;

            if self.settings.sleep.enable {
                self.sleep_check();
            }
        }
    }

    fn exit_kind(&self) -> LoopExit {
        if self.rt.exit_requested() {
            LoopExit::Exit
        } else {
            LoopExit::Reset
        }
    }

    /// Cold-start / re-entry gates: decide between ALARM lockout and a
    /// clean IDLE with the startup script.
    fn startup_gates<D: Dispatch<H, P>>(&mut self, dispatch: &mut D, cold_start: bool) {
        let control = self.hal.control_state();
        let homing_mask = self.settings.homing_mask();

        if control.e_stop {
            // Blocks everything until released and reset.
            self.set_state(State::EStop);
            self.hal.report_alarm(Alarm::EStop);
            self.hal.report_feedback(Feedback::EStop);
        } else if self.settings.homing.enabled
            && self.settings.homing.init_lock
            && !homing_mask.is_empty()
            && self.sys.homed != homing_mask
        {
            // Force a homing cycle before anything can move.
            self.set_state(State::Alarm);
            self.hal.report_alarm(Alarm::HomingRequired);
            self.hal.report_feedback(Feedback::HomingCycleRequired);
        } else if self.settings.limits.hard_enabled
            && self.settings.limits.check_at_init
            && !self.hal.limits_state().is_empty()
        {
            self.set_state(State::Alarm);
            self.hal.report_alarm(Alarm::LimitsEngaged);
            self.hal.report_feedback(Feedback::CheckLimits);
        } else if cold_start && (self.settings.force_initialization_alarm || control.reset) {
            self.set_state(State::Alarm);
            self.hal.report_feedback(Feedback::AlarmLock);
        } else if matches!(self.sys.state, State::Alarm | State::Sleep) {
            // Sleep disables the drivers; re-enter as ALARM so the operator
            // homes or acknowledges before motion.
            self.set_state(State::Alarm);
            self.hal.report_feedback(Feedback::AlarmLock);
        } else {
            self.set_state(State::Idle);
            if !self.settings.safety_door_ignore_when_idle && control.safety_door_ajar {
                self.rt.set_state_flags(EXEC_SAFETY_DOOR);
                let _ = self.execute_realtime();
            }
            dispatch.startup_script(self);
        }
    }

    fn dispatch_line<D: Dispatch<H, P>>(&mut self, dispatch: &mut D, assembler: &mut LineAssembler) {
        let line = std::mem::take(&mut assembler.line);
        let message = assembler
            .msg
            .show
            .then(|| std::mem::take(&mut assembler.msg.buf));

        let result = if assembler.overflow {
            Err(Status::Overflow)
        } else if line.is_empty() && message.is_none() {
            // Empty or comment line; report OK for syncing purposes.
            Ok(())
        } else if line.starts_with('$') {
            let result = dispatch.system_command(self, &line);
            if result == Err(Status::LimitsEngaged) {
                self.set_state(State::Alarm);
                self.hal.report_alarm(Alarm::LimitsEngaged);
                self.hal.report_feedback(Feedback::CheckLimits);
            }
            result
        } else if line.starts_with('[') {
            dispatch.user_command(self, &line)
        } else if self.gcode_blocked() {
            Err(Status::SystemGClock)
        } else {
            dispatch.gcode_block(self, &line, message.as_deref())
        };

        self.hal.report_status(result);
        assembler.reset_line(&mut self.keep_rt_commands);
        self.idle_mark = None;
    }

    fn gcode_blocked(&self) -> bool {
        self.sys.state.gcode_locked() || self.sys.state == State::Jog
    }

    /// Queue one out-of-band g-code line for execution from the main loop.
    /// Accepted only while idle, jogging or mid tool change, with no
    /// motion cancel pending and the slot free.
    pub fn enqueue_gcode(&mut self, gcode: &str) -> bool {
        let ok = self.xcommand.is_empty()
            && matches!(
                self.sys.state,
                State::Idle | State::Jog | State::ToolChange
            )
            && !self.rt.test(EXEC_MOTION_CANCEL);

        if ok {
            self.xcommand.push_str(gcode);
        }
        ok
    }

    /// Block until all buffered motion has executed. Works with a feed hold
    /// mid-sync; waits for the clean cycle end.
    pub fn buffer_synchronize(&mut self) -> McResult {
        self.auto_cycle_start();
        while self.planner.has_current_block() || self.sys.state == State::Cycle {
            self.execute_realtime()?;
        }
        Ok(())
    }

    /// Start queued motion when the program is not actively parsing:
    /// stream drained, buffer sync, or planner full.
    pub fn auto_cycle_start(&mut self) {
        if self.planner.has_current_block() {
            self.rt.set_state_flags(EXEC_CYCLE_START);
        }
    }

    /// The realtime checkpoint.
    ///
    /// Drains the event register, progresses the state machine, runs the
    /// port's realtime hook and parks in the suspend loop while a hold or
    /// door is active. Every busy-wait must call this between iterations;
    /// it is where `EXEC_RESET` takes effect.
    pub fn execute_realtime(&mut self) -> McResult {
        self.exec_rt_system()?;
        self.hal.poll_realtime(self.sys.state);

        if self.sys.suspend {
            self.rt_suspend()?;
        }

        if self.sys.abort {
            Err(Aborted)
        } else {
            Ok(())
        }
    }

    /// Drain and execute the realtime register once.
    fn exec_rt_system(&mut self) -> McResult {
        // Hand a queued user message to the display sink.
        if let Some(message) = self.message.take() {
            self.hal.show_message(&message);
        }

        if let Some(alarm) = self.rt.take_alarm() {
            self.alarm_handler(alarm);
        }

        let mut rt_exec = self.rt.clear_state_flags();
        if rt_exec != 0 {
            // Reset wins over everything else in the same drain pass.
            if rt_exec & EXEC_RESET != 0 {
                self.hal.driver_reset();
                // Under e-stop the abort is deferred; the e-stop alarm path
                // holds the foreground instead.
                self.sys.abort = !self.hal.control_state().e_stop;
                return if self.sys.abort { Err(Aborted) } else { Ok(()) };
            }

            if rt_exec & EXEC_STOP != 0 {
                self.stop_handler();
            }

            if rt_exec & EXEC_STATUS_REPORT != 0 {
                if self.rt.take_report_all() {
                    self.sys.report = ReportRequests {
                        homed: true,
                        spindle: true,
                        coolant: true,
                        overrides: true,
                    };
                }
                self.hal.report_realtime_status();
            }
            if rt_exec & EXEC_GCODE_REPORT != 0 {
                self.hal.report_gcode_modes();
            }
            if rt_exec & EXEC_PID_REPORT != 0 {
                self.hal.report_pid_log();
            }

            rt_exec &= !(EXEC_STOP | EXEC_STATUS_REPORT | EXEC_GCODE_REPORT | EXEC_PID_REPORT);

            // A deferred feed hold re-arms until a cycle start cancels it
            // or the disable clears.
            if self.sys.flags.feed_hold_pending {
                if rt_exec & EXEC_CYCLE_START != 0 {
                    self.sys.flags.feed_hold_pending = false;
                } else if !self.sys.overrides.control.feed_hold_disable {
                    rt_exec |= EXEC_FEED_HOLD;
                }
            }

            if rt_exec != 0 {
                self.update_state(rt_exec);
            }
        }

        if !self.sys.flags.delay_overrides {
            self.execute_overrides();
        }

        // Keep the step segment buffer fed while anything can move.
        if matches!(
            self.sys.state,
            State::Cycle | State::Hold | State::SafetyDoor | State::Homing | State::Sleep | State::Jog
        ) {
            self.hal.stepper_prep_buffer();
        }

        if self.sys.abort {
            Err(Aborted)
        } else {
            Ok(())
        }
    }

    fn alarm_handler(&mut self, alarm: Alarm) {
        error!("alarm: {:?}", alarm);
        self.set_state(if alarm == Alarm::EStop {
            State::EStop
        } else {
            State::Alarm
        });
        self.hal.report_alarm(alarm);

        if alarm.is_critical() {
            // Halt everything until the operator resets; hard and soft
            // limits typically trip unattended and continued streaming
            // could cause a serious crash. Status reports still flow.
            self.hal.report_feedback(if alarm == Alarm::EStop {
                Feedback::EStop
            } else {
                Feedback::CriticalEvent
            });

            self.rt.clear_state_flag(EXEC_RESET);
            while !self.rt.test(EXEC_RESET) {
                if self.rt.clear_state_flag(EXEC_STATUS_REPORT) & EXEC_STATUS_REPORT != 0 {
                    self.hal.report_realtime_status();
                }
                self.hal.poll_realtime(self.sys.state);
            }
        }
    }

    /// Controlled stop: drop everything queued, kill outputs, resync, idle.
    fn stop_handler(&mut self) {
        info!("controlled stop");
        self.sys.cancel = true;
        self.sys.step_control = StepControl::default();
        self.sys.flags.feed_hold_pending = false;
        self.sys.flags.delay_overrides = false;

        if self.sys.overrides.control.sync {
            self.sys.overrides.control = self.gc.override_ctrl;
        }

        self.gc.tool_change = false;
        self.gc.spindle = SpindleState::OFF;
        self.gc.coolant = CoolantState::OFF;
        self.hal.spindle_set_state(SpindleState::OFF, 0.0);
        self.hal.coolant_set_state(CoolantState::OFF);
        self.sys.report.spindle = true;
        self.sys.report.coolant = true;

        self.hal.driver_reset();
        if self.hal.stream_suspend(false) {
            // Flush blocks queued behind a suspended read (after M6).
            self.hal.stream_cancel_read();
        }

        self.planner.reset();
        self.hal.stepper_reset();
        self.sync_position();
        self.rt.flush_overrides();

        self.sys.suspend = false;
        self.set_state(State::Idle);
    }

    /// Suspend loop: parked here while a hold or safety door is active.
    fn rt_suspend(&mut self) -> McResult {
        while self.sys.suspend {
            if self.sys.abort {
                return Err(Aborted);
            }

            self.suspend_override_manager();

            // Door closed: keep requesting a restart until resumed.
            if self.sys.state == State::SafetyDoor
                && !self.hal.control_state().safety_door_ajar
            {
                self.rt.set_state_flags(EXEC_CYCLE_START);
            }

            if self.settings.sleep.enable {
                self.sleep_check();
            }

            self.exec_rt_system()?;
            self.hal.poll_realtime(self.sys.state);
        }
        Ok(())
    }

    /// Arm and check the inactivity timer; posts `EXEC_SLEEP` on expiry.
    pub(crate) fn sleep_check(&mut self) {
        // Sleep is only worth taking while parked with the spindle or
        // coolant still energized.
        let eligible = matches!(
            self.sys.state,
            State::Idle | State::Hold | State::SafetyDoor
        ) && (self.gc.spindle.on || self.gc.coolant.flood || self.gc.coolant.mist);

        if !eligible {
            self.idle_mark = None;
            return;
        }

        let now = self.hal.millis();
        match self.idle_mark {
            None => self.idle_mark = Some(now),
            Some(mark) => {
                if now.wrapping_sub(mark) >= self.settings.sleep.timeout_ms {
                    self.idle_mark = None;
                    self.rt.set_state_flags(EXEC_SLEEP);
                }
            }
        }
    }

    /// Restore the world for re-entry after an abort. The embedder calls
    /// this, re-seeds the parser, then re-enters [`Controller::main_loop`].
    pub fn reinitialize(&mut self) {
        self.sys.abort = false;
        self.sys.cancel = false;
        self.sys.suspend = false;
        self.sys.flags = SysFlags {
            block_delete_enabled: self.settings.block_delete_enabled,
            ..SysFlags::default()
        };
        self.sys.step_control = StepControl::default();
        self.sys.probe_state = ProbeState::Off;
        self.sys.overrides.feed = self.settings.overrides.feed_default;
        self.sys.overrides.rapid = self.settings.overrides.rapid_default;
        self.sys.overrides.spindle = self.settings.overrides.spindle_default;

        self.rt.clear_state_flags();
        self.rt.take_alarm();
        self.rt.flush_overrides();

        self.planner.reset();
        self.hal.stepper_reset();
        self.sync_position();

        self.message = None;
        self.xcommand.clear();
        self.keep_rt_commands = false;
        self.idle_mark = None;
    }
}
