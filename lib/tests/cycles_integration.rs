//! Canned-cycle integration tests: drill sequencing, chip-break pecking,
//! and the threading pass structure with its sync bracket invariant.

mod common;

use cnc_core::cycles::{CannedCycle, DrillMotion, RetractMode, TaperType, ThreadCycle};
use cnc_core::hal::{PlanLineData, SpindleState};
use cnc_core::{Plane, Settings, X_AXIS, Z_AXIS};
use common::{build_controller, install_motion_completion};

fn drill_params(retract: RetractMode, bottom: f32, r_plane: f32, prev: f32) -> CannedCycle {
    CannedCycle {
        retract_mode: retract,
        retract_position: r_plane,
        prev_position: prev,
        xyz: [10.0, 5.0, bottom],
        delta: 100.0,
        dwell: 0.0,
        spindle_off: false,
        rapid_retract: true,
    }
}

#[test]
fn plain_drill_single_plunge_sequence() {
    let (mut core, _hal, planner) = build_controller(Settings::default());

    let mut position = [0.0, 0.0, 5.0];
    let mut target = [10.0, 5.0, -10.0];
    let mut pl = PlanLineData {
        feed_rate: 120.0,
        ..PlanLineData::default()
    };
    let mut canned = drill_params(RetractMode::Previous, -10.0, 2.0, 5.0);

    core.canned_drill(
        DrillMotion::Plain,
        &mut target,
        &mut pl,
        &mut position,
        Plane::XY,
        1,
        &mut canned,
    )
    .unwrap();

    let planner = planner.borrow();
    let points: Vec<[f32; 3]> = planner.pushes.iter().map(|(p, _)| *p).collect();
    assert_eq!(
        points,
        vec![
            [10.0, 5.0, 5.0],   // rapid to hole at previous level
            [10.0, 5.0, 2.0],   // down to R
            [10.0, 5.0, -10.0], // plunge
            [10.0, 5.0, 2.0],   // retract to R
            [10.0, 5.0, 5.0],   // final retract to previous
        ]
    );

    // The plunge is the only feed move.
    let rapids: Vec<bool> = planner
        .pushes
        .iter()
        .map(|(_, pl)| pl.condition.rapid)
        .collect();
    assert_eq!(rapids, vec![true, true, false, true, true]);

    // The caller's position bookkeeping follows the cycle end point.
    assert_eq!(target, [10.0, 5.0, 5.0]);
}

#[test]
fn rplane_retract_skips_final_move() {
    let (mut core, _hal, planner) = build_controller(Settings::default());

    let mut position = [0.0, 0.0, 5.0];
    let mut target = [10.0, 5.0, -10.0];
    let mut pl = PlanLineData::default();
    let mut canned = drill_params(RetractMode::RPlane, -10.0, 2.0, 5.0);

    core.canned_drill(
        DrillMotion::Plain,
        &mut target,
        &mut pl,
        &mut position,
        Plane::XY,
        1,
        &mut canned,
    )
    .unwrap();

    let planner = planner.borrow();
    assert_eq!(planner.pushes.last().unwrap().0, [10.0, 5.0, 2.0]);
    assert_eq!(target[Z_AXIS], 2.0);
}

#[test]
fn chip_break_pecks_with_short_retracts() {
    let settings = Settings {
        g73_retract: 0.1,
        ..Settings::default()
    };
    let (mut core, _hal, planner) = build_controller(settings);

    let mut position = [0.0, 0.0, 5.0];
    let mut target = [10.0, 5.0, -4.0];
    let mut pl = PlanLineData::default();
    let mut canned = CannedCycle {
        retract_mode: RetractMode::RPlane,
        retract_position: 0.0,
        prev_position: 5.0,
        xyz: [10.0, 5.0, -4.0],
        delta: 2.0,
        dwell: 0.0,
        spindle_off: false,
        rapid_retract: true,
    };

    core.canned_drill(
        DrillMotion::ChipBreak,
        &mut target,
        &mut pl,
        &mut position,
        Plane::XY,
        1,
        &mut canned,
    )
    .unwrap();

    let planner = planner.borrow();
    let z: Vec<f32> = planner.pushes.iter().map(|(p, _)| p[Z_AXIS]).collect();
    assert_eq!(z, vec![5.0, 0.0, -2.0, -1.9, -4.0, 0.0]);
}

#[test]
fn dwell_and_spindle_stop_per_peck() {
    let (mut core, hal, planner) = build_controller(Settings::default());
    install_motion_completion(&mut core, &planner);
    core.gc.spindle = SpindleState {
        on: true,
        ..SpindleState::default()
    };

    let mut position = [0.0, 0.0, 5.0];
    let mut target = [10.0, 5.0, -1.0];
    let mut pl = PlanLineData {
        spindle_rpm: 1200.0,
        ..PlanLineData::default()
    };
    let mut canned = CannedCycle {
        retract_mode: RetractMode::RPlane,
        retract_position: 0.0,
        prev_position: 5.0,
        xyz: [10.0, 5.0, -1.0],
        delta: 100.0,
        dwell: 0.5,
        spindle_off: true,
        rapid_retract: true,
    };

    core.canned_drill(
        DrillMotion::Plain,
        &mut target,
        &mut pl,
        &mut position,
        Plane::XY,
        1,
        &mut canned,
    )
    .unwrap();

    let hal = hal.borrow();
    assert!(hal.dwells.contains(&0.5));

    // Spindle off at the bottom, restored per modal state after retract.
    assert_eq!(hal.spindle.len(), 2);
    assert!(!hal.spindle[0].0.on);
    assert!(hal.spindle[1].0.on);
    assert!((hal.spindle[1].1 - 1200.0).abs() < f32::EPSILON);
}

#[test]
fn incremental_repeats_shift_between_holes() {
    let (mut core, _hal, planner) = build_controller(Settings::default());
    core.gc.distance_incremental = true;

    let mut position = [0.0, 0.0, 2.0];
    let mut target = [10.0, 0.0, -1.0];
    let mut pl = PlanLineData::default();
    let mut canned = CannedCycle {
        retract_mode: RetractMode::RPlane,
        retract_position: 2.0,
        prev_position: 2.0,
        xyz: [10.0, 0.0, -1.0],
        delta: 100.0,
        dwell: 0.0,
        spindle_off: false,
        rapid_retract: true,
    };

    core.canned_drill(
        DrillMotion::Plain,
        &mut target,
        &mut pl,
        &mut position,
        Plane::XY,
        2,
        &mut canned,
    )
    .unwrap();

    let planner = planner.borrow();
    let points: Vec<[f32; 3]> = planner.pushes.iter().map(|(p, _)| *p).collect();
    // First hole at X10, shift by the block X to X20 for the repeat.
    assert!(points.contains(&[10.0, 0.0, -1.0]));
    assert!(points.contains(&[20.0, 0.0, 2.0]));
    assert!(points.contains(&[20.0, 0.0, -1.0]));
}

#[test]
fn thread_passes_regress_and_bracket_sync() {
    // S6 shape: depth 1.0, initial 0.2, degression 2.0, 2 spring passes.
    let (mut core, hal, planner) = build_controller(Settings::default());
    install_motion_completion(&mut core, &planner);

    let position = [20.0, 0.0, 0.0];
    let mut pl = PlanLineData {
        feed_rate: 1.5,
        ..PlanLineData::default()
    };
    let mut thread = ThreadCycle {
        pitch: 1.5,
        z_final: -30.0,
        peak: 0.1,
        initial_depth: 0.2,
        depth: 1.0,
        depth_degression: 2.0,
        infeed_angle: 0.0,
        spring_passes: 2,
        end_taper_type: TaperType::None,
        end_taper_length: 0.0,
        main_taper_height: 0.0,
        cut_direction: -1.0,
    };

    core.thread(&mut pl, &position, &mut thread, false).unwrap();

    let planner = planner.borrow();

    // 25 regressed passes plus 2 springs; each pass is entry, cut, retract.
    let sync_cuts: Vec<&(cnc_core::Position, PlanLineData)> = planner
        .pushes
        .iter()
        .filter(|(_, pl)| pl.condition.spindle.synchronized)
        .collect();
    assert_eq!(sync_cuts.len(), 27);

    // Every synchronized cut runs at feed with hold disabled and lands at
    // the final Z.
    for (point, pl) in &sync_cuts {
        assert!(!pl.condition.rapid);
        assert!(pl.overrides.feed_hold_disable);
        assert!((point[Z_AXIS] + 30.0).abs() < 1e-4);
    }

    // The bracket: the push before each cut is the rapid infeed, the push
    // after is the rapid retract back to the start X.
    for (idx, (_, pl)) in planner.pushes.iter().enumerate() {
        if pl.condition.spindle.synchronized {
            let before = &planner.pushes[idx - 1].1;
            let after = &planner.pushes[idx + 1].1;
            assert!(before.condition.rapid && !before.condition.spindle.synchronized);
            assert!(after.condition.rapid && !after.condition.spindle.synchronized);
            assert_eq!(planner.pushes[idx + 1].0[X_AXIS], 20.0);
        }
    }

    // Depth of cut regresses with the square root of the pass number and
    // the spring passes repeat full depth.
    let infeeds: Vec<f32> = planner
        .pushes
        .iter()
        .filter(|(_, pl)| pl.condition.rapid && pl.condition.spindle.synchronized == false)
        .map(|(p, _)| p[X_AXIS])
        .filter(|x| *x < 20.0)
        .collect();
    let first_infeed = 20.0 - (0.1 + 0.2);
    assert!((infeeds[0] - first_infeed).abs() < 1e-4);
    let full_infeed = 20.0 - (0.1 + 1.0);
    let springs = infeeds.iter().filter(|x| (*x - full_infeed).abs() < 1e-4).count();
    assert!(springs >= 3);

    // The sync latch dwell ran once per pass.
    assert_eq!(hal.borrow().dwells.iter().filter(|d| (**d - 0.01).abs() < 1e-6).count(), 27);
}

#[test]
fn thread_entry_taper_structure() {
    let (mut core, _hal, planner) = build_controller(Settings::default());
    install_motion_completion(&mut core, &planner);

    let position = [20.0, 0.0, 0.0];
    let mut pl = PlanLineData {
        feed_rate: 1.0,
        ..PlanLineData::default()
    };
    let mut thread = ThreadCycle {
        pitch: 1.0,
        z_final: -10.0,
        peak: 0.1,
        initial_depth: 0.5,
        depth: 0.5,
        depth_degression: 1.0,
        infeed_angle: 0.0,
        spring_passes: 0,
        end_taper_type: TaperType::Entry,
        end_taper_length: 2.0,
        main_taper_height: 0.0,
        cut_direction: -1.0,
    };

    core.thread(&mut pl, &position, &mut thread, false).unwrap();

    let planner = planner.borrow();
    // Single pass: taper lead-in (two sync moves) then the main cut, then
    // the rapid retract.
    let sync: Vec<&(cnc_core::Position, PlanLineData)> = planner
        .pushes
        .iter()
        .filter(|(_, pl)| pl.condition.spindle.synchronized)
        .collect();
    assert_eq!(sync.len(), 3);

    // The taper runs along Z opposing the cut: z_final < start, so the
    // taper descends from the start toward the thread.
    assert!((sync[1].0[Z_AXIS] - (-2.0)).abs() < 1e-4);
    // Main segment lands at z_final adjusted for the entry taper.
    assert!((sync[2].0[Z_AXIS] - (-10.0)).abs() < 1e-4);
}

#[test]
fn thread_infeed_angle_offsets_z_between_passes() {
    let (mut core, _hal, planner) = build_controller(Settings::default());
    install_motion_completion(&mut core, &planner);

    let position = [20.0, 0.0, 0.0];
    let mut pl = PlanLineData::default();
    let mut thread = ThreadCycle {
        pitch: 1.0,
        z_final: -10.0,
        peak: 0.1,
        initial_depth: 0.25,
        depth: 0.5,
        depth_degression: 1.0,
        infeed_angle: 30.0,
        spring_passes: 0,
        end_taper_type: TaperType::None,
        end_taper_length: 0.0,
        main_taper_height: 0.0,
        cut_direction: -1.0,
    };

    core.thread(&mut pl, &position, &mut thread, false).unwrap();

    let planner = planner.borrow();
    // First push is the compound-angle Z offset move.
    let infeed_factor = (30.0f32).to_radians().tan();
    assert!((planner.pushes[0].0[Z_AXIS] - 0.5 * infeed_factor).abs() < 1e-4);
}
