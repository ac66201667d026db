//! Homing driver: sequenced axis-group homing with limit-switch safety
//! preconditions and post-home position sync.

use log::{info, warn};

use crate::geometry::AxisMask;
use crate::hal::{Hal, Planner};
use crate::system::{Controller, State};
use crate::{Alarm, Status};

impl<H: Hal, P: Planner> Controller<H, P> {
    /// Perform a homing cycle to locate machine zero. Only `$H` reaches
    /// this; the planner buffer must be empty and the machine idle.
    ///
    /// With a non-empty `cycle` mask, only that axis group is homed.
    /// Otherwise the configured cycle table runs in order, stopping at the
    /// first failing group. On success the planner (and, by contract, the
    /// external parser) are resynced to the homed position and the axes are
    /// marked homed.
    pub fn homing_cycle(&mut self, cycle: AxisMask) -> Result<(), Status> {
        // Machines with both travel-end switches wired to one pin cannot
        // tell which end is engaged; refuse to start into an active switch.
        if self.settings.limits.two_switches && !self.hal.limits_state().is_empty() {
            warn!("homing refused: limit switch engaged on a two-switch input");
            self.motion_reset();
            self.rt.set_alarm(Alarm::HardLimit);
            return Err(Status::Unhandled);
        }

        // The hard-limit interrupt would fire on the switches we are about
        // to seek; keep it off for the duration.
        self.hal.limits_enable(false, true);
        self.set_state(State::Homing);

        let mut sought = AxisMask::NONE;

        if !cycle.is_empty() {
            sought = cycle;
            if !self.hal.seek_home(cycle) {
                self.motion_reset();
            }
        } else {
            self.sys.homed = AxisMask::NONE;
            let table = self.settings.homing.cycles;

            for group in table {
                if !group.is_empty() {
                    sought |= group;
                    if !self.hal.seek_home(group) {
                        self.motion_reset();
                        break;
                    }
                }
            }
        }

        if !sought.is_empty() {
            // A failed seek or a reset mid-cycle lands here with the abort
            // pending; the checkpoint latches the alarm and unwinds.
            if self.execute_realtime().is_err() {
                return Err(Status::Unhandled);
            }

            // Sync planner (and parser, by the dispatcher) to the homed
            // position.
            self.sync_position();
            self.sys.homed |= sought & self.settings.homing_mask();
            info!("homed axes {:#04x}", self.sys.homed.0);
        }

        self.sys.report.homed = true;
        self.set_state(State::Idle);

        // Re-enable per configuration; ports may also use this hook to
        // switch back from homing switch inputs.
        self.hal.limits_enable(self.settings.limits.hard_enabled, false);

        if self.settings.limits.hard_enabled
            && self.settings.limits.check_at_init
            && !self.hal.limits_state().is_empty()
        {
            Err(Status::LimitsEngaged)
        } else {
            Ok(())
        }
    }
}
