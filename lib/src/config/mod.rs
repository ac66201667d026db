//! Machine settings snapshot.
//!
//! The core treats settings as a read-only value loaded before the protocol
//! loop starts; persistence and the `$x=val` edit surface live outside this
//! crate. Defaults mirror a small 3-axis mill.

use serde::{Deserialize, Serialize};

use crate::geometry::AxisMask;
use crate::N_AXIS;

/// Arc correction interval bounds. Exact re-anchoring of the rotated radius
/// vector must happen at least every 20 segments to bound drift from the
/// small-angle approximation.
pub const ARC_CORRECTION_MIN: u32 = 4;
pub const ARC_CORRECTION_MAX: u32 = 20;

/// Complete settings snapshot consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Steps per millimeter, per axis.
    pub steps_per_mm: [f32; N_AXIS],

    /// Backlash compensation distance per axis (mm). Zero disables the axis.
    pub backlash: [f32; N_AXIS],

    /// Chip-break retract distance for peck drilling (mm).
    pub g73_retract: f32,

    /// Maximum chord-to-arc normal distance for arc segmentation (mm).
    pub arc_tolerance: f32,

    /// Segments between exact re-anchoring passes in the arc decomposer.
    /// Clamped into `[ARC_CORRECTION_MIN, ARC_CORRECTION_MAX]` by
    /// [`Settings::sanitize`].
    pub arc_correction: u32,

    /// Laser mode: zero-length moves carrying an S-word apply the spindle
    /// setpoint synchronously instead of being lost.
    pub laser_mode: bool,

    /// Power-on default for the block-delete (`/` line) switch.
    pub block_delete_enabled: bool,

    /// Accept the legacy single-character realtime commands `?`, `~`, `!`
    /// even inside `$` lines and comments.
    pub legacy_rt_commands: bool,

    /// Force an alarm state at cold start until the operator unlocks.
    pub force_initialization_alarm: bool,

    /// Do not enter the safety-door state while idle.
    pub safety_door_ignore_when_idle: bool,

    pub sleep: SleepSettings,
    pub report: ReportSettings,
    pub limits: LimitSettings,
    pub homing: HomingSettings,
    pub overrides: OverrideSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            steps_per_mm: [250.0; N_AXIS],
            backlash: [0.0; N_AXIS],
            g73_retract: 0.1,
            arc_tolerance: 0.002,
            arc_correction: 12,
            laser_mode: false,
            block_delete_enabled: false,
            legacy_rt_commands: true,
            force_initialization_alarm: false,
            safety_door_ignore_when_idle: false,
            sleep: SleepSettings::default(),
            report: ReportSettings::default(),
            limits: LimitSettings::default(),
            homing: HomingSettings::default(),
            overrides: OverrideSettings::default(),
        }
    }
}

impl Settings {
    /// Clamp values whose range the core depends on.
    pub fn sanitize(&mut self) {
        self.arc_correction = self
            .arc_correction
            .clamp(ARC_CORRECTION_MIN, ARC_CORRECTION_MAX);
        self.overrides.clamp_defaults();
    }

    /// Union of all configured homing cycle groups.
    pub fn homing_mask(&self) -> AxisMask {
        self.homing
            .cycles
            .iter()
            .fold(AxisMask::NONE, |acc, cycle| acc | *cycle)
    }
}

/// Sleep-on-inactivity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepSettings {
    pub enable: bool,
    /// Inactivity timeout in milliseconds.
    pub timeout_ms: u32,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            enable: false,
            timeout_ms: 5 * 60 * 1000,
        }
    }
}

/// Optional report payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Emit the probe coordinate report after each probe cycle.
    pub probe_coordinates: bool,
}

/// Travel limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub soft_enabled: bool,
    pub hard_enabled: bool,
    /// Refuse to leave alarm at cold start while a limit switch is engaged.
    pub check_at_init: bool,
    /// Both travel-end switches share one input pin; homing must refuse to
    /// start with any limit asserted.
    pub two_switches: bool,
    /// Clamp jog targets into the envelope instead of rejecting them.
    pub jog_soft_limited: bool,
    /// Lower travel bound per axis (mm, machine coordinates).
    pub travel_min: [f32; N_AXIS],
    /// Upper travel bound per axis (mm, machine coordinates).
    pub travel_max: [f32; N_AXIS],
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            soft_enabled: false,
            hard_enabled: false,
            check_at_init: false,
            two_switches: false,
            jog_soft_limited: false,
            travel_min: [-200.0; N_AXIS],
            travel_max: [0.0; N_AXIS],
        }
    }
}

impl LimitSettings {
    /// True when `target` lies inside the travel envelope on every axis.
    pub fn within_travel(&self, target: &crate::Position) -> bool {
        (0..N_AXIS).all(|idx| {
            target[idx] >= self.travel_min[idx] && target[idx] <= self.travel_max[idx]
        })
    }
}

/// Homing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingSettings {
    pub enabled: bool,
    /// Lock out g-code at cold start until a homing cycle succeeds.
    pub init_lock: bool,
    /// Axes that home toward the negative direction.
    pub dir_mask: AxisMask,
    /// Pull-off distance after tripping a switch (mm).
    pub pulloff: f32,
    /// Ordered axis groups, homed first to last. Empty groups are skipped.
    pub cycles: [AxisMask; N_AXIS],
}

impl Default for HomingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            init_lock: false,
            dir_mask: AxisMask::NONE,
            pulloff: 1.0,
            cycles: [
                AxisMask::bit(crate::Z_AXIS),
                AxisMask(AxisMask::bit(crate::X_AXIS).0 | AxisMask::bit(crate::Y_AXIS).0),
                AxisMask::NONE,
            ],
        }
    }
}

/// Override defaults, clamps and increments, all in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideSettings {
    pub feed_default: u8,
    pub feed_min: u8,
    pub feed_max: u8,
    pub feed_coarse: u8,
    pub feed_fine: u8,

    pub rapid_default: u8,
    pub rapid_medium: u8,
    pub rapid_low: u8,

    pub spindle_default: u8,
    pub spindle_min: u8,
    pub spindle_max: u8,
    pub spindle_coarse: u8,
    pub spindle_fine: u8,
}

impl Default for OverrideSettings {
    fn default() -> Self {
        Self {
            feed_default: 100,
            feed_min: 10,
            feed_max: 200,
            feed_coarse: 10,
            feed_fine: 1,
            rapid_default: 100,
            rapid_medium: 50,
            rapid_low: 25,
            spindle_default: 100,
            spindle_min: 10,
            spindle_max: 200,
            spindle_coarse: 10,
            spindle_fine: 1,
        }
    }
}

impl OverrideSettings {
    fn clamp_defaults(&mut self) {
        self.feed_default = self.feed_default.clamp(self.feed_min, self.feed_max);
        self.spindle_default = self
            .spindle_default
            .clamp(self.spindle_min, self.spindle_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_arc_correction() {
        let mut settings = Settings {
            arc_correction: 1,
            ..Settings::default()
        };
        settings.sanitize();
        assert_eq!(settings.arc_correction, ARC_CORRECTION_MIN);

        settings.arc_correction = 500;
        settings.sanitize();
        assert_eq!(settings.arc_correction, ARC_CORRECTION_MAX);
    }

    #[test]
    fn homing_mask_unions_cycle_groups() {
        let settings = Settings::default();
        assert_eq!(settings.homing_mask(), AxisMask::ALL);
    }

    #[test]
    fn travel_envelope_check() {
        let limits = LimitSettings::default();
        assert!(limits.within_travel(&[-10.0, -10.0, -0.5]));
        assert!(!limits.within_travel(&[150.0, 0.0, 0.0]));
        assert!(!limits.within_travel(&[-250.0, 0.0, 0.0]));
    }

    #[test]
    fn default_overrides_within_bounds() {
        let o = OverrideSettings::default();
        assert!(o.feed_min <= o.feed_default && o.feed_default <= o.feed_max);
        assert!(o.spindle_min <= o.spindle_default && o.spindle_default <= o.spindle_max);
    }
}
