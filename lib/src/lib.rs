//! # CNC motion-control and realtime-protocol core
//!
//! This crate implements the execution core of a CNC controller: it accepts
//! g-code motion requests, decomposes compound motions (arcs, canned drilling
//! cycles, threading, homing, probing) into a stream of straight-line
//! segments fed to a downstream trajectory planner, and interleaves that
//! production with a realtime command layer that applies system state
//! transitions (reset, feed hold, cycle start, overrides, alarms) safely
//! against concurrent interrupt-level input.
//!
//! The crate is deliberately hardware-free. Everything that touches metal is
//! behind two traits:
//!
//! - [`Planner`](hal::Planner) — the trajectory planner's ring buffer of
//!   kinematic blocks,
//! - [`Hal`](hal::Hal) — spindle, coolant, probe, limit switches, control
//!   pins, stepper buffer control, stream I/O, clocks and report sinks.
//!
//! The foreground call chain is a single cooperative loop owned by
//! [`Controller`]; interrupt-level producers communicate exclusively through
//! the lock-free [`RtRegister`](rt::RtRegister) and the shared
//! [`StepPosition`](rt::StepPosition) vector.
//!
//! # Module map
//!
//! - [`rt`] — realtime event register and realtime command ingest
//! - [`system`] — system state machine and override controller
//! - [`motion`] — motion gateway, arc decomposer, backlash tracker
//! - [`cycles`] — canned drilling and threading cycles
//! - [`homing`] / [`probe`] — homing and probing drivers
//! - [`protocol`] — main protocol loop, line assembly, buffer sync
//! - [`config`] — read-only settings snapshot
//! - [`geometry`] — axis-indexed vectors, planes, axis masks

use thiserror::Error;

pub mod config;
pub mod cycles;
pub mod geometry;
pub mod hal;
pub mod homing;
pub mod motion;
pub mod probe;
pub mod protocol;
pub mod rt;
pub mod system;

pub use config::Settings;
pub use geometry::{AxisMask, Plane, Position};
pub use hal::{Hal, PlanLineData, Planner};
pub use protocol::{Dispatch, LoopExit};
pub use system::{Controller, State};

/// Number of controlled axes. Geometry vectors are `[f32; N_AXIS]`.
pub const N_AXIS: usize = 3;

/// Axis indices into [`Position`] vectors.
pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;

/// Recoverable status codes returned to the issuer of a line.
///
/// These are the first error tier: the line is rejected, the machine keeps
/// running. Latched faults are [`Alarm`]s, and a system abort unwinds as
/// [`Aborted`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Input line exceeded the line buffer.
    #[error("line overflow")]
    Overflow,

    /// G-code is locked out by the current system state (alarm, e-stop, jog).
    #[error("g-code commands are locked out by the current system state")]
    SystemGClock,

    /// Commanded coordinates fall outside the configured travel envelope.
    #[error("target exceeds machine travel")]
    TravelExceeded,

    /// A limit switch is still engaged after a homing cycle.
    #[error("limit switch engaged")]
    LimitsEngaged,

    /// The request could not be completed; an alarm or abort carries the cause.
    #[error("command unhandled")]
    Unhandled,

    /// A g-code parser error, carrying the parser's own code.
    #[error("g-code parser error {0}")]
    Gcode(u16),
}

/// Latched fault conditions requiring operator acknowledgement.
///
/// Posting an alarm drives the state machine into `ALARM` (or `ESTOP`), and
/// the critical three — hard limit, soft limit, e-stop — additionally block
/// the foreground until a reset is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Alarm {
    HardLimit = 1,
    SoftLimit = 2,
    AbortCycle = 3,
    ProbeFailInitial = 4,
    ProbeFailContact = 5,
    HomingFailReset = 6,
    HomingRequired = 7,
    LimitsEngaged = 8,
    EStop = 10,
}

impl Alarm {
    /// Convert from the raw register code. Returns `None` for 0 or unknown
    /// values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::HardLimit),
            2 => Some(Self::SoftLimit),
            3 => Some(Self::AbortCycle),
            4 => Some(Self::ProbeFailInitial),
            5 => Some(Self::ProbeFailContact),
            6 => Some(Self::HomingFailReset),
            7 => Some(Self::HomingRequired),
            8 => Some(Self::LimitsEngaged),
            10 => Some(Self::EStop),
            _ => None,
        }
    }

    /// Critical alarms block the foreground until reset while still
    /// servicing status reports.
    #[inline]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::HardLimit | Self::SoftLimit | Self::EStop)
    }
}

/// The system abort token.
///
/// `EXEC_RESET` is the universal cancellation signal: every busy-wait runs
/// the realtime checkpoint and unwinds with this error once an abort is
/// observed, all the way back to the main loop which re-initializes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("system abort")]
pub struct Aborted;

/// Result alias for motion-level operations that only fail on system abort.
pub type McResult = Result<(), Aborted>;
