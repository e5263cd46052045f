//! Camera & Frame State Tests
//!
//! Tests for:
//! - Fly camera motion reporting and pitch clamping
//! - Static camera
//! - Frame state matrices (previous view-projection, unprojection)
//! - FPS counter and change tracker utilities

use glam::{Mat4, Vec2, Vec3};

use lumen::utils::{ChangeTracker, FpsCounter};
use lumen::{CameraController, CameraInput, FlyCamera, FrameState, StaticCamera};

const DT: f32 = 0.5;

// ============================================================================
// Cameras
// ============================================================================

#[test]
fn idle_fly_camera_reports_no_motion() {
    let mut camera = FlyCamera::default();
    let sample = camera.sample(DT);

    assert!(!sample.moved);
    assert_eq!(sample.position, Vec3::new(0.0, 5.0, 0.0));
    assert_eq!(sample.view, camera.view());
}

#[test]
fn fly_camera_moves_along_forward() {
    let mut camera = FlyCamera::default();
    camera.input(CameraInput {
        movement: Vec3::Z,
        ..CameraInput::default()
    });

    let sample = camera.sample(DT);

    // Default yaw of -90° looks down -Z; speed 10 for half a second
    assert!(sample.moved);
    assert!(sample.position.abs_diff_eq(Vec3::new(0.0, 5.0, -5.0), 1e-4));
    assert!(!camera.sample(DT).moved, "input is consumed by one sample");
}

#[test]
fn fly_camera_accumulates_input_between_samples() {
    let mut camera = FlyCamera::default();
    let step = CameraInput {
        movement: Vec3::X,
        ..CameraInput::default()
    };
    camera.input(step);
    camera.input(step);

    let sample = camera.sample(DT);
    assert!(sample.position.abs_diff_eq(Vec3::new(10.0, 5.0, 0.0), 1e-4));
}

#[test]
fn fly_camera_pitch_is_clamped() {
    let mut camera = FlyCamera::default();
    camera.input(CameraInput {
        look_delta: Vec2::new(0.0, -10_000.0),
        ..CameraInput::default()
    });

    let sample = camera.sample(DT);

    assert!(sample.moved);
    assert_eq!(camera.pitch, 89.0);
    assert!(camera.forward().y > 0.99);
    assert!(sample.view.is_finite());
}

#[test]
fn look_input_rotates_yaw() {
    let mut camera = FlyCamera::default();
    camera.input(CameraInput {
        look_delta: Vec2::new(900.0, 0.0),
        ..CameraInput::default()
    });
    camera.sample(DT);

    // 900 px * 0.1 °/px = 90°: from -Z to +X
    assert!((camera.yaw - 0.0).abs() < 1e-4);
    assert!(camera.forward().abs_diff_eq(Vec3::X, 1e-4));
}

#[test]
fn static_camera_never_moves() {
    let eye = Vec3::new(0.0, 2.0, 8.0);
    let mut camera = StaticCamera::looking_at(eye, Vec3::ZERO);

    for _ in 0..3 {
        let sample = camera.sample(DT);
        assert!(!sample.moved);
        assert_eq!(sample.position, eye);
        assert_eq!(sample.view, Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y));
    }
}

// ============================================================================
// Frame State
// ============================================================================

#[test]
fn set_view_keeps_previous_view_projection() {
    let mut state = FrameState::default();
    state.set_projection(Mat4::perspective_rh(1.0, 1.5, 0.1, 50.0), 0.1, 50.0);

    let first = Mat4::look_at_rh(Vec3::Z, Vec3::ZERO, Vec3::Y);
    state.set_view(first, Vec3::Z);
    let first_proj_view = state.proj_view;

    state.set_view(Mat4::look_at_rh(Vec3::X, Vec3::ZERO, Vec3::Y), Vec3::X);

    assert_eq!(state.prev_proj_view, first_proj_view);
    assert_eq!(state.camera_pos, Vec3::X);
    assert!((state.proj_view * state.inv_proj_view).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    assert_eq!((state.near, state.far), (0.1, 50.0));
}

#[test]
fn unproject_screen_center_lies_on_view_axis() {
    let mut state = FrameState::default();
    state.set_projection(Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0), 0.1, 50.0);
    let eye = Vec3::new(0.0, 0.0, 10.0);
    state.set_view(Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y), eye);

    let near = state.unproject(Vec2::splat(0.5), 0.0);
    let far = state.unproject(Vec2::splat(0.5), 1.0);

    assert!(near.abs_diff_eq(Vec3::new(0.0, 0.0, 9.9), 1e-3));
    assert!(far.abs_diff_eq(Vec3::new(0.0, 0.0, -40.0), 1e-2));
}

#[test]
fn unproject_top_left_is_up_and_left() {
    let mut state = FrameState::default();
    state.set_projection(Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0), 0.1, 50.0);
    state.set_view(Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y), Vec3::ZERO);

    let p = state.unproject(Vec2::ZERO, 0.5);
    assert!(p.x < 0.0 && p.y > 0.0 && p.z < 0.0, "{p}");
}

// ============================================================================
// Utilities
// ============================================================================

#[test]
fn fps_counter_reports_once_per_second() {
    let mut fps = FpsCounter::new();

    let reports: Vec<f32> = (0..12).filter_map(|_| fps.update(0.25)).collect();

    assert_eq!(reports, vec![4.0, 4.0, 4.0]);
    assert_eq!(fps.current(), 4.0);
}

#[test]
fn fps_counter_starts_at_zero() {
    let mut fps = FpsCounter::new();
    assert_eq!(fps.update(0.1), None);
    assert_eq!(fps.current(), 0.0);
}

#[test]
fn change_tracker_versions() {
    let mut tracker = ChangeTracker::new();
    let seen = tracker.version();
    assert!(!tracker.changed_since(seen));

    tracker.changed();
    tracker.changed();

    assert_eq!(tracker.version(), seen + 2);
    assert!(tracker.changed_since(seen));
    assert!(!tracker.changed_since(tracker.version()));
}
