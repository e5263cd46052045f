//! Per-frame uniform block.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Camera and timing state, rebuilt once per frame by the orchestrator and
/// bound read-only at [`FRAME_STATE_SLOT`] for every program.
///
/// Matrices use the column-vector convention: `proj_view = projection * view`.
///
/// [`FRAME_STATE_SLOT`]: crate::renderer::core::FRAME_STATE_SLOT
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameState {
    pub projection: Mat4,
    pub inv_projection: Mat4,
    pub view: Mat4,
    pub inv_view: Mat4,
    pub proj_view: Mat4,
    /// Previous frame's `proj_view`, for motion vectors.
    pub prev_proj_view: Mat4,
    pub inv_proj_view: Mat4,
    pub camera_pos: Vec3,
    /// Frames rendered since the last reset. Doubles as the path tracer's
    /// accumulation counter.
    pub frame_count: u32,
    pub near: f32,
    pub far: f32,
    pub _pad: [f32; 2],
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            inv_projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inv_view: Mat4::IDENTITY,
            proj_view: Mat4::IDENTITY,
            prev_proj_view: Mat4::IDENTITY,
            inv_proj_view: Mat4::IDENTITY,
            camera_pos: Vec3::ZERO,
            frame_count: 0,
            near: 0.0,
            far: 0.0,
            _pad: [0.0; 2],
        }
    }
}

impl FrameState {
    /// Sets the projection and its inverse.
    pub fn set_projection(&mut self, projection: Mat4, near: f32, far: f32) {
        self.projection = projection;
        self.inv_projection = projection.inverse();
        self.near = near;
        self.far = far;
        self.refresh_proj_view();
    }

    /// Sets the camera. The current `proj_view` becomes `prev_proj_view`.
    pub fn set_view(&mut self, view: Mat4, camera_pos: Vec3) {
        self.prev_proj_view = self.proj_view;
        self.view = view;
        self.inv_view = view.inverse();
        self.camera_pos = camera_pos;
        self.refresh_proj_view();
    }

    fn refresh_proj_view(&mut self) {
        self.proj_view = self.projection * self.view;
        self.inv_proj_view = self.proj_view.inverse();
    }

    /// World-space position of a pixel at normalized device depth `ndc_z`.
    #[must_use]
    pub fn unproject(&self, uv: glam::Vec2, ndc_z: f32) -> Vec3 {
        let ndc = glam::Vec3::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, ndc_z);
        self.inv_proj_view.project_point3(ndc)
    }
}
