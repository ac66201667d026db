//! Shared test support: a scripted mock HAL and a recording planner.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use cnc_core::geometry::{AxisMask, Position};
use cnc_core::hal::{
    ControlState, CoolantState, DelayMode, Feedback, Hal, PlanLineData, Planner, SpindleState,
};
use cnc_core::protocol::Dispatch;
use cnc_core::{Alarm, Controller, Settings, State, Status, N_AXIS};

/// Everything the mock HAL records and the script can mutate.
pub struct HalLog {
    pub spindle: Vec<(SpindleState, f32)>,
    pub coolant: Vec<CoolantState>,
    pub probe_inverts: Vec<bool>,
    pub probe_triggered: bool,
    pub input: VecDeque<u8>,
    pub read_suspended: bool,
    pub cancelled_reads: u32,
    pub control: ControlState,
    pub limits: AxisMask,
    pub seek_ok: bool,
    pub seeks: Vec<AxisMask>,
    pub limits_enabled: Vec<(bool, bool)>,
    pub stepper_events: Vec<&'static str>,
    pub millis: u32,
    pub dwells: Vec<f32>,
    pub driver_resets: u32,
    pub statuses: Vec<Result<(), Status>>,
    pub alarms: Vec<Alarm>,
    pub feedbacks: Vec<Feedback>,
    pub rt_reports: u32,
    pub probe_reports: Vec<(Position, bool)>,
    pub messages: Vec<String>,
}

impl Default for HalLog {
    fn default() -> Self {
        Self {
            spindle: Vec::new(),
            coolant: Vec::new(),
            probe_inverts: Vec::new(),
            probe_triggered: false,
            input: VecDeque::new(),
            read_suspended: false,
            cancelled_reads: 0,
            control: ControlState::default(),
            limits: AxisMask::NONE,
            seek_ok: true,
            seeks: Vec::new(),
            limits_enabled: Vec::new(),
            stepper_events: Vec::new(),
            millis: 0,
            dwells: Vec::new(),
            driver_resets: 0,
            statuses: Vec::new(),
            alarms: Vec::new(),
            feedbacks: Vec::new(),
            rt_reports: 0,
            probe_reports: Vec::new(),
            messages: Vec::new(),
        }
    }
}

/// Mock HAL. The `poll` hook runs at every realtime checkpoint with
/// mutable access to the log, which is how tests inject events mid-cycle.
pub struct MockHal {
    pub log: Rc<RefCell<HalLog>>,
    pub poll: Option<Box<dyn FnMut(State, &mut HalLog)>>,
}

impl Hal for MockHal {
    fn spindle_set_state(&mut self, state: SpindleState, rpm: f32) {
        self.log.borrow_mut().spindle.push((state, rpm));
    }

    fn coolant_set_state(&mut self, state: CoolantState) {
        self.log.borrow_mut().coolant.push(state);
    }

    fn probe_configure(&mut self, invert: bool) {
        self.log.borrow_mut().probe_inverts.push(invert);
    }

    fn probe_triggered(&self) -> bool {
        self.log.borrow().probe_triggered
    }

    fn stream_read(&mut self) -> Option<u8> {
        self.log.borrow_mut().input.pop_front()
    }

    fn stream_suspend(&mut self, suspend: bool) -> bool {
        let mut log = self.log.borrow_mut();
        let prior = log.read_suspended;
        log.read_suspended = suspend;
        prior
    }

    fn stream_cancel_read(&mut self) {
        self.log.borrow_mut().cancelled_reads += 1;
    }

    fn control_state(&self) -> ControlState {
        self.log.borrow().control
    }

    fn limits_enable(&mut self, hard: bool, homing: bool) {
        self.log.borrow_mut().limits_enabled.push((hard, homing));
    }

    fn limits_state(&self) -> AxisMask {
        self.log.borrow().limits
    }

    fn seek_home(&mut self, cycle: AxisMask) -> bool {
        let mut log = self.log.borrow_mut();
        log.seeks.push(cycle);
        log.seek_ok
    }

    fn stepper_wake(&mut self) {
        self.log.borrow_mut().stepper_events.push("wake");
    }

    fn stepper_go_idle(&mut self) {
        self.log.borrow_mut().stepper_events.push("idle");
    }

    fn stepper_prep_buffer(&mut self) {
        self.log.borrow_mut().stepper_events.push("prep");
    }

    fn stepper_reset(&mut self) {
        self.log.borrow_mut().stepper_events.push("reset");
    }

    fn stepper_parking_setup(&mut self) {
        self.log.borrow_mut().stepper_events.push("parking");
    }

    fn millis(&self) -> u32 {
        self.log.borrow().millis
    }

    fn delay_sec(&mut self, seconds: f32, _mode: DelayMode) {
        self.log.borrow_mut().dwells.push(seconds);
    }

    fn driver_reset(&mut self) {
        self.log.borrow_mut().driver_resets += 1;
    }

    fn poll_realtime(&mut self, state: State) {
        if let Some(poll) = self.poll.as_mut() {
            let mut log = self.log.borrow_mut();
            poll(state, &mut log);
        }
    }

    fn report_status(&mut self, result: Result<(), Status>) {
        self.log.borrow_mut().statuses.push(result);
    }

    fn report_alarm(&mut self, alarm: Alarm) {
        self.log.borrow_mut().alarms.push(alarm);
    }

    fn report_feedback(&mut self, message: Feedback) {
        self.log.borrow_mut().feedbacks.push(message);
    }

    fn report_realtime_status(&mut self) {
        self.log.borrow_mut().rt_reports += 1;
    }

    fn report_probe_result(&mut self, position: &Position, succeeded: bool) {
        self.log
            .borrow_mut()
            .probe_reports
            .push((*position, succeeded));
    }

    fn show_message(&mut self, message: &str) {
        self.log.borrow_mut().messages.push(message.to_string());
    }
}

/// What the recording planner saw and how it should behave.
#[derive(Default)]
pub struct PlannerLog {
    pub pushes: Vec<(Position, PlanLineData)>,
    /// `is_full` answers true this many more times.
    pub full_countdown: u32,
    /// Reject (zero-length) this many upcoming pushes.
    pub reject_next: u32,
    pub has_block: bool,
    pub resets: u32,
    pub syncs: Vec<[i32; N_AXIS]>,
    pub feed_overrides: Vec<(u8, u8)>,
}

pub struct RecordingPlanner {
    pub log: Rc<RefCell<PlannerLog>>,
}

impl Planner for RecordingPlanner {
    fn push(&mut self, target: &Position, pl: &PlanLineData) -> bool {
        let mut log = self.log.borrow_mut();
        if log.reject_next > 0 {
            log.reject_next -= 1;
            return false;
        }
        log.pushes.push((*target, pl.clone()));
        log.has_block = true;
        true
    }

    fn is_full(&self) -> bool {
        let mut log = self.log.borrow_mut();
        if log.full_countdown > 0 {
            log.full_countdown -= 1;
            true
        } else {
            false
        }
    }

    fn has_current_block(&self) -> bool {
        self.log.borrow().has_block
    }

    fn reset(&mut self) {
        let mut log = self.log.borrow_mut();
        log.resets += 1;
        log.has_block = false;
        log.full_countdown = 0;
    }

    fn sync_position(&mut self, steps: &[i32; N_AXIS]) {
        self.log.borrow_mut().syncs.push(*steps);
    }

    fn feed_override(&mut self, feed_percent: u8, rapid_percent: u8) {
        self.log
            .borrow_mut()
            .feed_overrides
            .push((feed_percent, rapid_percent));
    }
}

pub type TestController = Controller<MockHal, RecordingPlanner>;

/// Build a controller around fresh logs.
pub fn build_controller(
    settings: Settings,
) -> (TestController, Rc<RefCell<HalLog>>, Rc<RefCell<PlannerLog>>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let hal_log = Rc::new(RefCell::new(HalLog::default()));
    let planner_log = Rc::new(RefCell::new(PlannerLog::default()));

    let hal = MockHal {
        log: hal_log.clone(),
        poll: None,
    };
    let planner = RecordingPlanner {
        log: planner_log.clone(),
    };

    (
        Controller::new(hal, planner, settings),
        hal_log,
        planner_log,
    )
}

/// Script the mock so queued motion "completes" at the next checkpoint:
/// the block drains and the stepper posts cycle-complete. Required by any
/// test that reaches `buffer_synchronize` (dwells, spindle restore,
/// probing).
pub fn install_motion_completion(core: &mut TestController, planner: &Rc<RefCell<PlannerLog>>) {
    let rt = core.rt.clone();
    let planner = planner.clone();
    core.hal.poll = Some(Box::new(move |_, _| {
        let mut log = planner.borrow_mut();
        if log.has_block {
            log.has_block = false;
            rt.set_state_flags(cnc_core::rt::EXEC_CYCLE_COMPLETE);
        }
    }));
}

/// Recording dispatcher for protocol-loop tests. `$H` runs the homing
/// driver, `$J=` issues a fixed jog, both gated the way a real system
/// command surface gates them.
#[derive(Default)]
pub struct TestDispatch {
    pub system: Vec<String>,
    pub user: Vec<String>,
    pub gcode: Vec<(String, Option<String>)>,
    pub startups: u32,
}

impl Dispatch<MockHal, RecordingPlanner> for TestDispatch {
    fn system_command(
        &mut self,
        core: &mut TestController,
        line: &str,
    ) -> Result<(), Status> {
        self.system.push(line.to_string());

        if line == "$H" {
            return core.homing_cycle(AxisMask::NONE);
        }
        if line == "$E" {
            // Test hook: inject an out-of-band system command.
            core.enqueue_gcode("$X");
            return Ok(());
        }
        if line.starts_with("$J=") {
            if core.sys.state.gcode_locked() {
                return Err(Status::SystemGClock);
            }
            return core.jog_execute(&[1.0, 0.0, 0.0], 600.0, 0);
        }
        Ok(())
    }

    fn user_command(
        &mut self,
        _core: &mut TestController,
        line: &str,
    ) -> Result<(), Status> {
        self.user.push(line.to_string());
        Ok(())
    }

    fn gcode_block(
        &mut self,
        _core: &mut TestController,
        line: &str,
        message: Option<&str>,
    ) -> Result<(), Status> {
        self.gcode
            .push((line.to_string(), message.map(|m| m.to_string())));
        Ok(())
    }

    fn startup_script(&mut self, _core: &mut TestController) {
        self.startups += 1;
    }
}
