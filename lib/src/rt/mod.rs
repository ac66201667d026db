//! Realtime event register and realtime command ingest.
//!
//! Interrupt-level producers (stream ISR, control pins, limit switches, the
//! stepper driver) and the foreground both publish events here; only the
//! foreground drains. The register is a pair of lock-free words — state
//! flags OR-accumulate until drained all-at-once, the alarm slot holds one
//! latched code — plus two bounded override queues that drop on overflow
//! rather than block.
//!
//! The ingest half classifies raw stream bytes at the boundary between
//! control characters (siphoned into the register, never buffered) and the
//! g-code character stream (passed through to line assembly).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU8, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::hal::{Hal, Planner};
use crate::system::{Controller, State};
use crate::{Alarm, N_AXIS};

/// Pending-event flags. Writers OR in; the drain swaps to zero.
pub const EXEC_STATUS_REPORT: u16 = 1 << 0;
pub const EXEC_CYCLE_START: u16 = 1 << 1;
pub const EXEC_CYCLE_COMPLETE: u16 = 1 << 2;
pub const EXEC_FEED_HOLD: u16 = 1 << 3;
pub const EXEC_RESET: u16 = 1 << 4;
pub const EXEC_SAFETY_DOOR: u16 = 1 << 5;
pub const EXEC_MOTION_CANCEL: u16 = 1 << 6;
pub const EXEC_SLEEP: u16 = 1 << 7;
pub const EXEC_STOP: u16 = 1 << 8;
pub const EXEC_GCODE_REPORT: u16 = 1 << 9;
pub const EXEC_PID_REPORT: u16 = 1 << 10;

/// Realtime command bytes.
pub mod cmd {
    pub const EXIT: u8 = 0x03;
    /// Ctrl-E, alternate status report request.
    pub const STATUS_REPORT_CTRL: u8 = 0x05;
    /// Ctrl-X.
    pub const RESET: u8 = 0x18;
    pub const STOP: u8 = 0x19;

    pub const STATUS_REPORT: u8 = 0x80;
    pub const CYCLE_START: u8 = 0x81;
    pub const FEED_HOLD: u8 = 0x82;
    pub const GCODE_REPORT: u8 = 0x83;
    pub const SAFETY_DOOR: u8 = 0x84;
    pub const JOG_CANCEL: u8 = 0x85;
    pub const STATUS_REPORT_ALL: u8 = 0x87;
    pub const OPTIONAL_STOP_TOGGLE: u8 = 0x88;
    pub const PID_REPORT: u8 = 0x8D;

    pub const STATUS_REPORT_LEGACY: u8 = b'?';
    pub const CYCLE_START_LEGACY: u8 = b'~';
    pub const FEED_HOLD_LEGACY: u8 = b'!';

    pub const OVERRIDE_FEED_RESET: u8 = 0x90;
    pub const OVERRIDE_FEED_COARSE_PLUS: u8 = 0x91;
    pub const OVERRIDE_FEED_COARSE_MINUS: u8 = 0x92;
    pub const OVERRIDE_FEED_FINE_PLUS: u8 = 0x93;
    pub const OVERRIDE_FEED_FINE_MINUS: u8 = 0x94;
    pub const OVERRIDE_RAPID_RESET: u8 = 0x95;
    pub const OVERRIDE_RAPID_MEDIUM: u8 = 0x96;
    pub const OVERRIDE_RAPID_LOW: u8 = 0x97;

    pub const OVERRIDE_SPINDLE_RESET: u8 = 0x99;
    pub const OVERRIDE_SPINDLE_COARSE_PLUS: u8 = 0x9A;
    pub const OVERRIDE_SPINDLE_COARSE_MINUS: u8 = 0x9B;
    pub const OVERRIDE_SPINDLE_FINE_PLUS: u8 = 0x9C;
    pub const OVERRIDE_SPINDLE_FINE_MINUS: u8 = 0x9D;
    pub const OVERRIDE_SPINDLE_STOP: u8 = 0x9E;
    pub const OVERRIDE_COOLANT_FLOOD_TOGGLE: u8 = 0xA0;
    pub const OVERRIDE_COOLANT_MIST_TOGGLE: u8 = 0xA1;
}

const OVERRIDE_QUEUE_CAPACITY: usize = 16;

/// The ISR-shared realtime record.
///
/// This is the only mutable state interrupt-level code may touch. Everything
/// else in the system is owned by the foreground [`Controller`].
pub struct RtRegister {
    exec_state: AtomicU16,
    exec_alarm: AtomicU8,
    /// Current mode, published by the foreground on every transition so
    /// interrupt-side logic (jog cancel) can consult it.
    state_snapshot: AtomicU8,
    exit: AtomicBool,
    /// Stop / jog-cancel request the line assembler to drop its partial line.
    discard_line: AtomicBool,
    optional_stop_disable: AtomicBool,
    report_all: AtomicBool,
    feed_override: ArrayQueue<u8>,
    accessory_override: ArrayQueue<u8>,
}

impl Default for RtRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl RtRegister {
    pub fn new() -> Self {
        Self {
            exec_state: AtomicU16::new(0),
            exec_alarm: AtomicU8::new(0),
            state_snapshot: AtomicU8::new(State::Idle as u8),
            exit: AtomicBool::new(false),
            discard_line: AtomicBool::new(false),
            optional_stop_disable: AtomicBool::new(false),
            report_all: AtomicBool::new(false),
            feed_override: ArrayQueue::new(OVERRIDE_QUEUE_CAPACITY),
            accessory_override: ArrayQueue::new(OVERRIDE_QUEUE_CAPACITY),
        }
    }

    /// OR pending event flags in. Any context.
    #[inline]
    pub fn set_state_flags(&self, mask: u16) {
        self.exec_state.fetch_or(mask, Ordering::AcqRel);
    }

    /// Drain all pending flags at once, returning the snapshot.
    #[inline]
    pub fn clear_state_flags(&self) -> u16 {
        self.exec_state.swap(0, Ordering::AcqRel)
    }

    /// Clear a subset of flags, returning the value prior to the clear.
    #[inline]
    pub fn clear_state_flag(&self, mask: u16) -> u16 {
        self.exec_state.fetch_and(!mask, Ordering::AcqRel)
    }

    /// True when any flag in `mask` is pending.
    #[inline]
    pub fn test(&self, mask: u16) -> bool {
        self.exec_state.load(Ordering::Acquire) & mask != 0
    }

    /// Latch an alarm code. A later alarm replaces an undrained earlier one.
    #[inline]
    pub fn set_alarm(&self, alarm: Alarm) {
        self.exec_alarm.store(alarm as u8, Ordering::Release);
    }

    /// Peek the latched alarm without draining it.
    #[inline]
    pub fn alarm(&self) -> Option<Alarm> {
        Alarm::from_u8(self.exec_alarm.load(Ordering::Acquire))
    }

    /// Drain the latched alarm.
    #[inline]
    pub fn take_alarm(&self) -> Option<Alarm> {
        Alarm::from_u8(self.exec_alarm.swap(0, Ordering::AcqRel))
    }

    #[inline]
    pub(crate) fn publish_state(&self, state: State) {
        self.state_snapshot.store(state as u8, Ordering::Release);
    }

    /// The mode most recently published by the foreground.
    #[inline]
    pub fn state(&self) -> State {
        State::from_u8(self.state_snapshot.load(Ordering::Acquire)).unwrap_or(State::Alarm)
    }

    #[inline]
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Release);
    }

    #[inline]
    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_discard_line(&self) {
        self.discard_line.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn take_discard_line(&self) -> bool {
        self.discard_line.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn toggle_optional_stop(&self) {
        self.optional_stop_disable.fetch_xor(true, Ordering::AcqRel);
    }

    #[inline]
    pub fn optional_stop_disabled(&self) -> bool {
        self.optional_stop_disable.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_report_all(&self) {
        self.report_all.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn take_report_all(&self) -> bool {
        self.report_all.swap(false, Ordering::AcqRel)
    }

    /// Queue a feed/rapid override command byte. Dropped when full.
    #[inline]
    pub fn enqueue_feed_override(&self, command: u8) {
        let _ = self.feed_override.push(command);
    }

    #[inline]
    pub(crate) fn dequeue_feed_override(&self) -> Option<u8> {
        self.feed_override.pop()
    }

    /// Queue a spindle/coolant override command byte. Dropped when full.
    #[inline]
    pub fn enqueue_accessory_override(&self, command: u8) {
        let _ = self.accessory_override.push(command);
    }

    #[inline]
    pub(crate) fn dequeue_accessory_override(&self) -> Option<u8> {
        self.accessory_override.pop()
    }

    /// Discard all queued override commands.
    pub(crate) fn flush_overrides(&self) {
        while self.feed_override.pop().is_some() {}
        while self.accessory_override.pop().is_some() {}
    }
}

/// Machine position in steps, written by the step generator, read by the
/// foreground under a read-twice snapshot convention.
pub struct StepPosition {
    axes: [AtomicI32; N_AXIS],
}

impl Default for StepPosition {
    fn default() -> Self {
        Self::new()
    }
}

impl StepPosition {
    pub fn new() -> Self {
        Self {
            axes: std::array::from_fn(|_| AtomicI32::new(0)),
        }
    }

    /// Consistent snapshot: read twice, retry until both reads agree.
    pub fn snapshot(&self) -> [i32; N_AXIS] {
        loop {
            let first = self.load();
            let second = self.load();
            if first == second {
                return first;
            }
        }
    }

    pub fn store(&self, steps: &[i32; N_AXIS]) {
        for (slot, value) in self.axes.iter().zip(steps) {
            slot.store(*value, Ordering::Release);
        }
    }

    fn load(&self) -> [i32; N_AXIS] {
        std::array::from_fn(|idx| self.axes[idx].load(Ordering::Acquire))
    }
}

/// Classification of one incoming stream byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RtAction {
    /// Line boundary, always passed through.
    LineBreak,
    /// Unassigned control character, silently dropped.
    SilentDrop,
    /// Ordinary stream character; kept unless it has the top bit set outside
    /// a preserve-verbatim context.
    Printable,
    Stop,
    Reset,
    Exit,
    StatusReport { all: bool },
    CycleStart,
    FeedHold,
    SafetyDoor,
    JogCancel,
    GcodeReport,
    OptionalStopToggle,
    PidReport,
    FeedOverride,
    AccessoryOverride,
    LegacyStatusReport,
    LegacyCycleStart,
    LegacyFeedHold,
}

/// Classify a raw stream byte. Pure; the side effects live in
/// [`Controller::process_byte`].
pub(crate) fn classify(c: u8) -> RtAction {
    use cmd::*;

    match c {
        b'\n' | b'\r' => RtAction::LineBreak,
        STOP => RtAction::Stop,
        RESET => RtAction::Reset,
        EXIT => RtAction::Exit,
        STATUS_REPORT_ALL => RtAction::StatusReport { all: true },
        STATUS_REPORT | STATUS_REPORT_CTRL => RtAction::StatusReport { all: false },
        CYCLE_START => RtAction::CycleStart,
        FEED_HOLD => RtAction::FeedHold,
        SAFETY_DOOR => RtAction::SafetyDoor,
        JOG_CANCEL => RtAction::JogCancel,
        GCODE_REPORT => RtAction::GcodeReport,
        OPTIONAL_STOP_TOGGLE => RtAction::OptionalStopToggle,
        PID_REPORT => RtAction::PidReport,
        OVERRIDE_FEED_RESET..=OVERRIDE_RAPID_LOW => RtAction::FeedOverride,
        OVERRIDE_SPINDLE_RESET..=OVERRIDE_SPINDLE_STOP
        | OVERRIDE_COOLANT_FLOOD_TOGGLE
        | OVERRIDE_COOLANT_MIST_TOGGLE => RtAction::AccessoryOverride,
        STATUS_REPORT_LEGACY => RtAction::LegacyStatusReport,
        CYCLE_START_LEGACY => RtAction::LegacyCycleStart,
        FEED_HOLD_LEGACY => RtAction::LegacyFeedHold,
        0x00..=0x1F | 0x7F..=0xBF => RtAction::SilentDrop,
        _ => RtAction::Printable,
    }
}

impl<H: Hal, P: Planner> Controller<H, P> {
    /// Realtime command ingest: pick realtime command characters off the
    /// input stream before they reach line assembly.
    ///
    /// Returns `true` when the byte was consumed (or dropped) and must not
    /// be buffered. Never blocks, never allocates.
    ///
    /// The legacy single-character commands `?`, `~` and `!` act only when
    /// legacy mode is configured or the current line is not in a
    /// preserve-verbatim context (a `$` system line or a comment).
    pub fn process_byte(&mut self, c: u8) -> bool {
        match classify(c) {
            RtAction::LineBreak => false,

            RtAction::Stop => {
                self.rt.set_state_flags(EXEC_STOP);
                self.rt.set_discard_line();
                self.hal.stream_cancel_read();
                true
            }

            RtAction::Reset => {
                // E-stop outranks reset; release is handled at cold start.
                if !self.hal.control_state().e_stop {
                    self.motion_reset();
                }
                true
            }

            RtAction::Exit => {
                self.motion_reset();
                self.rt.request_exit();
                true
            }

            RtAction::StatusReport { all } => {
                if all {
                    self.rt.set_report_all();
                }
                self.rt.set_state_flags(EXEC_STATUS_REPORT);
                true
            }

            RtAction::CycleStart => {
                self.rt.set_state_flags(EXEC_CYCLE_START);
                true
            }

            RtAction::FeedHold => {
                self.rt.set_state_flags(EXEC_FEED_HOLD);
                true
            }

            RtAction::SafetyDoor => {
                self.rt.set_state_flags(EXEC_SAFETY_DOOR);
                true
            }

            RtAction::JogCancel => {
                self.rt.set_discard_line();
                self.hal.stream_cancel_read();
                // Block all other states from invoking motion cancel.
                if self.rt.state() == State::Jog {
                    self.rt.set_state_flags(EXEC_MOTION_CANCEL);
                }
                true
            }

            RtAction::GcodeReport => {
                self.rt.set_state_flags(EXEC_GCODE_REPORT);
                true
            }

            RtAction::OptionalStopToggle => {
                self.rt.toggle_optional_stop();
                true
            }

            RtAction::PidReport => {
                self.rt.set_state_flags(EXEC_PID_REPORT);
                true
            }

            RtAction::FeedOverride => {
                self.rt.enqueue_feed_override(c);
                true
            }

            RtAction::AccessoryOverride => {
                self.rt.enqueue_accessory_override(c);
                true
            }

            RtAction::LegacyStatusReport => {
                if self.legacy_rt_allowed() {
                    self.rt.set_state_flags(EXEC_STATUS_REPORT);
                    true
                } else {
                    false
                }
            }

            RtAction::LegacyCycleStart => {
                if self.legacy_rt_allowed() {
                    self.rt.set_state_flags(EXEC_CYCLE_START);
                    true
                } else {
                    false
                }
            }

            RtAction::LegacyFeedHold => {
                if self.legacy_rt_allowed() {
                    self.rt.set_state_flags(EXEC_FEED_HOLD);
                    true
                } else {
                    false
                }
            }

            RtAction::SilentDrop => true,

            RtAction::Printable => !(self.keep_rt_commands || c < 0x7F),
        }
    }

    fn legacy_rt_allowed(&self) -> bool {
        !self.keep_rt_commands || self.settings.legacy_rt_commands
    }
}
