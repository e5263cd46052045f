//! Camera Control
//!
//! The frame pipeline does not own input handling. Each frame it asks a
//! [`CameraController`] for a [`CameraSample`]: the view matrix, the eye
//! position and whether the camera moved this frame.
//!
//! [`FlyCamera`] is the bundled first-person controller. Platform code feeds
//! it per-frame deltas through [`FlyCamera::input`].

use glam::{Mat4, Vec2, Vec3};

/// What the frame pipeline consumes from a camera each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSample {
    pub view: Mat4,
    pub position: Vec3,
    /// Whether any movement or rotation was applied since the last sample.
    pub moved: bool,
}

/// Source of camera state, polled once per frame.
pub trait CameraController {
    /// Advances the camera by `dt` seconds and returns its state.
    fn sample(&mut self, dt: f32) -> CameraSample;
}

/// Per-frame input accumulated by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraInput {
    /// Camera-relative movement axes: x = right, y = up, z = forward.
    pub movement: Vec3,
    /// Mouse delta in pixels.
    pub look_delta: Vec2,
}

impl CameraInput {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.movement == Vec3::ZERO && self.look_delta == Vec2::ZERO
    }
}

/// First-person fly camera with yaw / pitch in degrees.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    pub position: Vec3,
    pub up: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    /// Degrees per pixel of mouse movement.
    pub sensitivity: f32,
    /// World units per second.
    pub speed: f32,
    pending: CameraInput,
}

impl FlyCamera {
    #[must_use]
    pub fn new(position: Vec3, up: Vec3, yaw: f32, pitch: f32, sensitivity: f32, speed: f32) -> Self {
        Self {
            position,
            up,
            yaw,
            pitch,
            sensitivity,
            speed,
            pending: CameraInput::default(),
        }
    }

    /// Queues input for the next [`sample`](CameraController::sample).
    pub fn input(&mut self, input: CameraInput) {
        self.pending.movement += input.movement;
        self.pending.look_delta += input.look_delta;
    }

    #[must_use]
    pub fn forward(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    #[must_use]
    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), self.up)
    }
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 5.0, 0.0), Vec3::Y, -90.0, 0.0, 0.1, 10.0)
    }
}

impl CameraController for FlyCamera {
    fn sample(&mut self, dt: f32) -> CameraSample {
        let input = std::mem::take(&mut self.pending);
        let moved = !input.is_idle();

        if moved {
            self.yaw += input.look_delta.x * self.sensitivity;
            self.pitch = (self.pitch - input.look_delta.y * self.sensitivity).clamp(-89.0, 89.0);

            let forward = self.forward();
            let right = forward.cross(self.up).normalize_or_zero();
            let step = (right * input.movement.x
                + self.up * input.movement.y
                + forward * input.movement.z)
                * self.speed
                * dt;
            self.position += step;
        }

        CameraSample {
            view: self.view(),
            position: self.position,
            moved,
        }
    }
}

/// A camera that never moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticCamera {
    pub view: Mat4,
    pub position: Vec3,
}

impl StaticCamera {
    #[must_use]
    pub fn looking_at(eye: Vec3, target: Vec3) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            position: eye,
        }
    }
}

impl CameraController for StaticCamera {
    fn sample(&mut self, _dt: f32) -> CameraSample {
        CameraSample {
            view: self.view,
            position: self.position,
            moved: false,
        }
    }
}
