//! Override controller: applies queued feed, rapid, spindle and coolant
//! override commands, respecting which states permit them.

use log::debug;

use crate::config::OverrideSettings;
use crate::hal::{Hal, Planner, SpindleState};
use crate::rt::cmd;
use crate::system::{Controller, State};

/// Fold one feed/rapid override command into the pending percentages.
fn apply_feed_command(command: u8, feed: &mut u8, rapid: &mut u8, o: &OverrideSettings) {
    match command {
        cmd::OVERRIDE_FEED_RESET => *feed = o.feed_default,
        cmd::OVERRIDE_FEED_COARSE_PLUS => *feed = feed.saturating_add(o.feed_coarse),
        cmd::OVERRIDE_FEED_COARSE_MINUS => *feed = feed.saturating_sub(o.feed_coarse),
        cmd::OVERRIDE_FEED_FINE_PLUS => *feed = feed.saturating_add(o.feed_fine),
        cmd::OVERRIDE_FEED_FINE_MINUS => *feed = feed.saturating_sub(o.feed_fine),
        cmd::OVERRIDE_RAPID_RESET => *rapid = o.rapid_default,
        cmd::OVERRIDE_RAPID_MEDIUM => *rapid = o.rapid_medium,
        cmd::OVERRIDE_RAPID_LOW => *rapid = o.rapid_low,
        _ => {}
    }
}

/// Fold one spindle override command into the pending percentage.
fn apply_spindle_command(command: u8, spindle: &mut u8, o: &OverrideSettings) {
    match command {
        cmd::OVERRIDE_SPINDLE_RESET => *spindle = o.spindle_default,
        cmd::OVERRIDE_SPINDLE_COARSE_PLUS => *spindle = spindle.saturating_add(o.spindle_coarse),
        cmd::OVERRIDE_SPINDLE_COARSE_MINUS => *spindle = spindle.saturating_sub(o.spindle_coarse),
        cmd::OVERRIDE_SPINDLE_FINE_PLUS => *spindle = spindle.saturating_add(o.spindle_fine),
        cmd::OVERRIDE_SPINDLE_FINE_MINUS => *spindle = spindle.saturating_sub(o.spindle_fine),
        _ => {}
    }
}

impl<H: Hal, P: Planner> Controller<H, P> {
    /// Drain and apply both override queues. Skipped entirely while
    /// `delay_overrides` is set.
    pub(crate) fn execute_overrides(&mut self) {
        // Feed and rapid group.
        if let Some(first) = self.rt.dequeue_feed_override() {
            let mut feed = self.sys.overrides.feed;
            let mut rapid = self.sys.overrides.rapid;

            let mut command = first;
            loop {
                apply_feed_command(command, &mut feed, &mut rapid, &self.settings.overrides);
                match self.rt.dequeue_feed_override() {
                    Some(next) => command = next,
                    None => break,
                }
            }

            feed = feed.clamp(
                self.settings.overrides.feed_min,
                self.settings.overrides.feed_max,
            );

            if feed != self.sys.overrides.feed || rapid != self.sys.overrides.rapid {
                debug!("feed override {}%, rapid override {}%", feed, rapid);
                self.sys.overrides.feed = feed;
                self.sys.overrides.rapid = rapid;
                self.sys.report.overrides = true;
                self.planner.feed_override(feed, rapid);
            }
        }

        // Spindle, coolant and spindle-stop group.
        if let Some(first) = self.rt.dequeue_accessory_override() {
            let mut spindle = self.sys.overrides.spindle;
            let mut spindle_stop = false;
            let mut coolant = self.gc.coolant;

            let mut command = first;
            loop {
                match command {
                    cmd::OVERRIDE_SPINDLE_STOP => spindle_stop = !spindle_stop,
                    cmd::OVERRIDE_COOLANT_MIST_TOGGLE => {
                        if self.coolant_override_allowed() {
                            coolant.mist = !coolant.mist;
                        }
                    }
                    cmd::OVERRIDE_COOLANT_FLOOD_TOGGLE => {
                        if self.coolant_override_allowed() {
                            coolant.flood = !coolant.flood;
                        }
                    }
                    _ => apply_spindle_command(command, &mut spindle, &self.settings.overrides),
                }
                match self.rt.dequeue_accessory_override() {
                    Some(next) => command = next,
                    None => break,
                }
            }

            spindle = spindle.clamp(
                self.settings.overrides.spindle_min,
                self.settings.overrides.spindle_max,
            );

            if spindle != self.sys.overrides.spindle {
                debug!("spindle override {}%", spindle);
                self.sys.overrides.spindle = spindle;
                self.sys.report.overrides = true;
                if self.gc.spindle.on {
                    self.sys.step_control.update_spindle_rpm = true;
                }
            }

            // Coolant changes finish queued motion first, then switch.
            if coolant != self.gc.coolant && self.buffer_synchronize().is_ok() {
                self.hal.coolant_set_state(coolant);
                self.gc.coolant = coolant;
                self.sys.report.coolant = true;
            }

            // Spindle stop is a two-phase toggle, permitted only while held
            // with the spindle running.
            if spindle_stop && self.sys.state == State::Hold && self.gc.spindle.on {
                let stop = self.sys.overrides.spindle_stop;
                if !(stop.initiate || stop.enabled || stop.restore) {
                    self.sys.overrides.spindle_stop.initiate = true;
                } else if stop.enabled {
                    self.sys.overrides.spindle_stop.restore = true;
                }
            }
        }
    }

    /// Service the spindle-stop override phases. Runs from the suspend loop.
    pub(crate) fn suspend_override_manager(&mut self) {
        if self.sys.overrides.spindle_stop.initiate {
            self.hal.spindle_set_state(SpindleState::OFF, 0.0);
            self.sys.overrides.spindle_stop.initiate = false;
            self.sys.overrides.spindle_stop.enabled = true;
            self.sys.report.spindle = true;
        }

        if self.sys.overrides.spindle_stop.restore {
            if self.gc.spindle.on {
                debug!("restoring spindle after stop override");
                self.hal.spindle_set_state(self.gc.spindle, self.gc.spindle_rpm);
            }
            self.sys.overrides.spindle_stop = Default::default();
            self.sys.report.spindle = true;
        }
    }

    fn coolant_override_allowed(&self) -> bool {
        matches!(self.sys.state, State::Idle | State::Cycle | State::Hold)
    }
}
