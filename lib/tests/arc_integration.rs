//! Arc decomposition integration tests: chord tolerance, exact landing,
//! boundary travels and mid-arc cancellation.

mod common;

use cnc_core::hal::{MotionCondition, PlanLineData};
use cnc_core::rt::EXEC_RESET;
use cnc_core::{Alarm, Plane, Settings, State};
use common::build_controller;

#[test]
fn quarter_arc_segments_and_exact_landing() {
    // S2: R=10 quarter arc CCW, tolerance 0.002 -> 39 segments, last push
    // exactly on target.
    let (mut core, _hal, planner) = build_controller(Settings::default());

    let mut position = [10.0, 0.0, 0.0];
    let target = [0.0, 10.0, 0.0];
    let offset = [-10.0, 0.0, 0.0];
    let mut pl = PlanLineData {
        feed_rate: 600.0,
        ..PlanLineData::default()
    };

    core.arc(&target, &mut pl, &mut position, &offset, 10.0, Plane::XY, false)
        .unwrap();

    let planner = planner.borrow();
    assert_eq!(planner.pushes.len(), 39);
    assert_eq!(planner.pushes.last().unwrap().0, [0.0, 10.0, 0.0]);

    // Every intermediate point stays on the circle within float rounding;
    // the center is position + offset = (0, 0).
    for (point, _) in &planner.pushes {
        let r = (point[0] * point[0] + point[1] * point[1]).sqrt();
        assert!(
            (r - 10.0).abs() <= 0.003,
            "segment endpoint off the circle: radius {r}"
        );
    }
}

#[test]
fn sub_epsilon_travel_emits_single_push() {
    // Angular travel below the direction epsilon: no segmentation, one
    // exact push to the target.
    let (mut core, _hal, planner) = build_controller(Settings::default());

    let mut position = [10.0, 0.0, 0.0];
    let target = [10.0, 1.0e-5, 0.0];
    let offset = [-10.0, 0.0, 0.0];
    let mut pl = PlanLineData::default();

    core.arc(&target, &mut pl, &mut position, &offset, 10.0, Plane::XY, false)
        .unwrap();

    let planner = planner.borrow();
    assert_eq!(planner.pushes.len(), 1);
    assert_eq!(planner.pushes[0].0, target);
}

#[test]
fn coincident_endpoints_trace_a_full_circle() {
    // Equal start and end points on a CCW arc command a full circle.
    let (mut core, _hal, planner) = build_controller(Settings::default());

    let mut position = [10.0, 0.0, 0.0];
    let target = [10.0, 0.0, 0.0];
    let offset = [-10.0, 0.0, 0.0];
    let mut pl = PlanLineData::default();

    core.arc(&target, &mut pl, &mut position, &offset, 10.0, Plane::XY, false)
        .unwrap();

    let planner = planner.borrow();
    assert!(planner.pushes.len() > 100);
    assert_eq!(planner.pushes.last().unwrap().0, target);
}

#[test]
fn helical_arc_advances_linear_axis() {
    let (mut core, _hal, planner) = build_controller(Settings::default());

    let mut position = [10.0, 0.0, 0.0];
    let target = [0.0, 10.0, 4.0];
    let offset = [-10.0, 0.0, 0.0];
    let mut pl = PlanLineData::default();

    core.arc(&target, &mut pl, &mut position, &offset, 10.0, Plane::XY, false)
        .unwrap();

    let planner = planner.borrow();
    let n = planner.pushes.len();
    assert!(n > 1);

    // Z climbs monotonically and lands exactly.
    let mut prev_z = 0.0;
    for (point, _) in &planner.pushes {
        assert!(point[2] >= prev_z);
        prev_z = point[2];
    }
    assert_eq!(planner.pushes[n - 1].0[2], 4.0);
}

#[test]
fn inverse_time_feed_scales_by_segment_count() {
    let (mut core, _hal, planner) = build_controller(Settings::default());

    let mut position = [10.0, 0.0, 0.0];
    let target = [0.0, 10.0, 0.0];
    let offset = [-10.0, 0.0, 0.0];
    let mut pl = PlanLineData {
        feed_rate: 2.0,
        condition: MotionCondition {
            inverse_time: true,
            ..MotionCondition::default()
        },
        ..PlanLineData::default()
    };

    core.arc(&target, &mut pl, &mut position, &offset, 10.0, Plane::XY, false)
        .unwrap();

    let planner = planner.borrow();
    assert_eq!(planner.pushes.len(), 39);
    for (_, pl) in &planner.pushes {
        assert!(!pl.condition.inverse_time);
        assert!((pl.feed_rate - 2.0 * 39.0).abs() < 1e-3);
    }
}

#[test]
fn reset_mid_arc_stops_segment_stream() {
    // S4: reset after 10 segments. The loop exits before segment 11 and
    // the abort leaves the machine alarmed; re-initialization empties the
    // planner.
    let (mut core, _hal, planner) = build_controller(Settings::default());
    core.set_state(State::Cycle);

    let rt = core.rt.clone();
    let planner_probe = planner.clone();
    core.hal.poll = Some(Box::new(move |_, _| {
        if planner_probe.borrow().pushes.len() >= 10 {
            // Interrupt-level reset: flag plus the abort-cycle alarm.
            rt.set_alarm(Alarm::AbortCycle);
            rt.set_state_flags(EXEC_RESET);
        }
    }));

    let mut position = [10.0, 0.0, 0.0];
    let target = [0.0, 10.0, 0.0];
    let offset = [-10.0, 0.0, 0.0];
    let mut pl = PlanLineData::default();

    let result = core.arc(&target, &mut pl, &mut position, &offset, 10.0, Plane::XY, false);

    assert!(result.is_err());
    assert!(core.sys.abort);
    assert_eq!(core.sys.state, State::Alarm);
    assert!(planner.borrow().pushes.len() <= 11);

    // Re-initialization drops the pre-reset motion.
    core.reinitialize();
    let planner = planner.borrow();
    assert!(planner.resets >= 1);
    assert!(!planner.has_block);
}
