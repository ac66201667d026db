//! Probing driver: one-shot probing motion with pin-state monitoring,
//! failure taxonomy and buffer flush.

use log::{debug, warn};

use crate::geometry::Position;
use crate::hal::{Hal, PlanLineData, Planner};
use crate::rt::EXEC_CYCLE_START;
use crate::system::{Controller, ProbeState, State};
use crate::Alarm;

/// Probe cycle parser flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeFlags {
    /// G38.4/G38.5: probe away from the workpiece (trigger on release).
    pub away: bool,
    /// G38.3/G38.5: no alarm when the probe does not trigger.
    pub no_error: bool,
}

/// Outcome of a probing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe triggered within travel; position captured.
    Found,
    /// Probe was already triggered before the motion started.
    FailInitial,
    /// Motion completed without the probe triggering.
    FailEnd,
    /// Check mode: nothing executed.
    CheckMode,
    /// A system abort interrupted the cycle.
    Aborted,
}

impl<H: Hal, P: Planner> Controller<H, P> {
    /// Perform a probing cycle toward `target`.
    ///
    /// Queued motion is drained first. The probe monitor is polled at every
    /// realtime checkpoint while the motion runs; on trigger the machine
    /// position is latched into `sys.probe_position` and the motion is cut
    /// short. The stepper and planner buffers are always flushed afterwards
    /// to discard the remainder of the probe move.
    pub fn probe_cycle(
        &mut self,
        target: &Position,
        pl: &mut PlanLineData,
        flags: ProbeFlags,
    ) -> ProbeOutcome {
        if self.sys.state == State::CheckMode {
            return ProbeOutcome::CheckMode;
        }

        // Finish all queued commands and empty the planner buffer first.
        if self.buffer_synchronize().is_err() || self.sys.abort {
            return ProbeOutcome::Aborted;
        }

        self.sys.flags.probe_succeeded = false;
        self.hal.probe_configure(flags.away);

        // Already triggered before moving: nothing to do but bail.
        if self.hal.probe_triggered() {
            warn!("probe already triggered at cycle start");
            self.rt.set_alarm(Alarm::ProbeFailInitial);
            let _ = self.execute_realtime();
            self.hal.probe_configure(false);
            return ProbeOutcome::FailInitial;
        }

        // Queue the probing motion and start the cycle ourselves; auto
        // cycle-start must not.
        if self.line(target, pl).is_err() {
            self.hal.probe_configure(false);
            return ProbeOutcome::Aborted;
        }

        self.sys.probe_state = ProbeState::Active;
        self.rt.set_state_flags(EXEC_CYCLE_START);

        // Wait for the trigger or the end of travel.
        loop {
            if self.execute_realtime().is_err() {
                self.hal.probe_configure(false);
                return ProbeOutcome::Aborted;
            }

            if self.sys.probe_state == ProbeState::Active && self.hal.probe_triggered() {
                // Latch and cut the motion short.
                self.sys.probe_position = self.position.snapshot();
                self.sys.probe_state = ProbeState::Off;
                self.hal.stepper_go_idle();
                self.rt.set_state_flags(crate::rt::EXEC_CYCLE_COMPLETE);
                debug!("probe triggered at {:?}", self.sys.probe_position);
            }

            if self.sys.state == State::Idle {
                break;
            }
        }

        // Probing cycle complete; classify.
        if self.sys.probe_state == ProbeState::Active {
            if flags.no_error {
                self.sys.probe_position = self.position.snapshot();
            } else {
                self.rt.set_alarm(Alarm::ProbeFailContact);
            }
        } else {
            self.sys.flags.probe_succeeded = true;
        }

        self.sys.probe_state = ProbeState::Off;
        self.hal.probe_configure(false);
        let _ = self.execute_realtime();

        // Flush the remainder of the probe motion and resync.
        self.hal.stepper_reset();
        self.planner.reset();
        self.sync_position();

        if self.settings.report.probe_coordinates {
            let mpos = crate::geometry::steps_to_mpos(
                &self.sys.probe_position,
                &self.settings.steps_per_mm,
            );
            let succeeded = self.sys.flags.probe_succeeded;
            self.hal.report_probe_result(&mpos, succeeded);
        }

        if self.sys.flags.probe_succeeded {
            ProbeOutcome::Found
        } else {
            ProbeOutcome::FailEnd
        }
    }
}
