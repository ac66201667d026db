//! Arc decomposer.
//!
//! Circular arcs are approximated by straight segments whose chordal error
//! against the true circle is bounded by `settings.arc_tolerance`. The
//! radius vector is advanced by an amortised small-angle rotation —
//! `cos ≈ 1 − θ²/2`, `sin ≈ θ(cos + 4)/6` — with an exact trig re-anchor
//! every `settings.arc_correction` segments to bound the accumulated drift.
//! This keeps per-segment cost to one rotation, with the expensive
//! `sin`/`cos` pair amortised across the correction interval.

use std::f32::consts::PI;

use crate::geometry::{Plane, Position};
use crate::hal::{Hal, PlanLineData, Planner};
use crate::system::Controller;
use crate::McResult;

/// Residual below this does not flip the travel direction; guards a
/// near-full circle from collapsing to zero on rounding.
const ANGULAR_TRAVEL_EPSILON: f32 = 5e-7;

/// Signed angular travel from the start radius vector `(r0, r1)` to the
/// target radius vector `(rt0, rt1)`, normalized to the commanded
/// direction: negative for clockwise, positive for counter-clockwise.
/// A single `atan2` is the only trig call.
pub(crate) fn angular_travel(r0: f32, r1: f32, rt0: f32, rt1: f32, clockwise: bool) -> f32 {
    let mut travel = (r0 * rt1 - r1 * rt0).atan2(r0 * rt0 + r1 * rt1);

    if clockwise {
        if travel >= -ANGULAR_TRAVEL_EPSILON {
            travel -= 2.0 * PI;
        }
    } else if travel <= ANGULAR_TRAVEL_EPSILON {
        travel += 2.0 * PI;
    }

    travel
}

/// Segment count keeping the chord-to-arc normal distance within
/// `tolerance`. End points lie on the circle, so the sagitta of each chord
/// is the binding error.
pub(crate) fn chord_segments(angular_travel: f32, radius: f32, tolerance: f32) -> u32 {
    ((0.5 * angular_travel * radius).abs() / (tolerance * (2.0 * radius - tolerance)).sqrt())
        .floor() as u32
}

impl<H: Hal, P: Planner> Controller<H, P> {
    /// Execute an arc in offset-center form.
    ///
    /// `position` is the current point and is advanced through the
    /// intermediate segments; `offset` is the center offset from it in the
    /// plane; `plane` selects the two circular axes and the helical axis.
    /// The final segment always lands exactly on `target` to absorb
    /// rounding. Each segment goes through [`Controller::line`], so the
    /// realtime checkpoint has already run when a segment is pushed and the
    /// loop bails out mid-circle on abort.
    #[allow(clippy::too_many_arguments)]
    pub fn arc(
        &mut self,
        target: &Position,
        pl: &mut PlanLineData,
        position: &mut Position,
        offset: &Position,
        radius: f32,
        plane: Plane,
        clockwise: bool,
    ) -> McResult {
        let center_0 = position[plane.axis_0] + offset[plane.axis_0];
        let center_1 = position[plane.axis_1] + offset[plane.axis_1];

        // Radius vector from center to current location.
        let mut r0 = -offset[plane.axis_0];
        let mut r1 = -offset[plane.axis_1];
        let rt0 = target[plane.axis_0] - center_0;
        let rt1 = target[plane.axis_1] - center_1;

        let travel = angular_travel(r0, r1, rt0, rt1, clockwise);
        let segments = chord_segments(travel, radius, self.settings.arc_tolerance);

        if segments > 0 {
            // Inverse-time feed was specified for the whole arc; spread it
            // so the sum over all segments matches.
            if pl.condition.inverse_time {
                pl.feed_rate *= segments as f32;
                pl.condition.inverse_time = false;
            }

            let theta_per_segment = travel / segments as f32;
            let linear_per_segment =
                (target[plane.axis_linear] - position[plane.axis_linear]) / segments as f32;

            let mut cos_t = 2.0 - theta_per_segment * theta_per_segment;
            let sin_t = theta_per_segment * 0.166_666_67 * (cos_t + 4.0);
            cos_t *= 0.5;

            let mut correction_count = 0;

            for segment in 1..segments {
                if correction_count < self.settings.arc_correction {
                    // Incremental rotation of the radius vector.
                    let r_next = r0 * sin_t + r1 * cos_t;
                    r0 = r0 * cos_t - r1 * sin_t;
                    r1 = r_next;
                    correction_count += 1;
                } else {
                    // Re-anchor exactly from the initial radius vector to
                    // cancel the approximation drift.
                    let angle = segment as f32 * theta_per_segment;
                    let (sin_i, cos_i) = angle.sin_cos();
                    r0 = -offset[plane.axis_0] * cos_i + offset[plane.axis_1] * sin_i;
                    r1 = -offset[plane.axis_0] * sin_i - offset[plane.axis_1] * cos_i;
                    correction_count = 0;
                }

                position[plane.axis_0] = center_0 + r0;
                position[plane.axis_1] = center_1 + r1;
                position[plane.axis_linear] += linear_per_segment;

                self.line(position, pl)?;
            }
        }

        // Land exactly on the commanded target.
        self.line(target, pl)
    }
}
