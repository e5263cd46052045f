//! Render Context
//!
//! [`RenderContext`] is the per-frame bound-state tracker threaded through
//! every pass. It borrows the device for the duration of one frame, keeps
//! the frame-state uniform block bound at [`FRAME_STATE_SLOT`], and
//! remembers which program is current so redundant binds are skipped.
//!
//! Nothing here outlives the frame: the next frame starts from a fresh
//! context with no program bound.

use glam::Vec4;
use log::trace;

use super::device::GpuDevice;
use super::resources::{
    Access, BarrierFlags, Binding, Bindings, BufferId, IndirectDraw, ProgramId, RenderPassDesc,
    TextureId, FRAME_STATE_SLOT,
};

pub struct RenderContext<'a> {
    device: &'a mut dyn GpuDevice,
    frame_state: BufferId,
    bound_program: Option<ProgramId>,
    bindings: Bindings,
    program_switches: u32,
}

impl<'a> RenderContext<'a> {
    pub fn new(device: &'a mut dyn GpuDevice, frame_state: BufferId) -> Self {
        let mut bindings = Bindings::new();
        bindings.set(FRAME_STATE_SLOT, Binding::UniformBuffer(frame_state));
        Self {
            device,
            frame_state,
            bound_program: None,
            bindings,
            program_switches: 0,
        }
    }

    #[inline]
    pub fn device(&mut self) -> &mut dyn GpuDevice {
        &mut *self.device
    }

    #[inline]
    #[must_use]
    pub fn frame_state_buffer(&self) -> BufferId {
        self.frame_state
    }

    #[inline]
    #[must_use]
    pub fn bound_program(&self) -> Option<ProgramId> {
        self.bound_program
    }

    /// Number of actual program changes issued this frame.
    #[inline]
    #[must_use]
    pub fn program_switches(&self) -> u32 {
        self.program_switches
    }

    #[inline]
    #[must_use]
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Makes `program` current unless it already is.
    pub fn use_program(&mut self, program: ProgramId) {
        if self.bound_program == Some(program) {
            return;
        }
        self.device.use_program(program);
        self.bound_program = Some(program);
        self.program_switches += 1;
    }

    /// Unbinds every slot except the frame state.
    pub fn reset_bindings(&mut self) {
        self.bindings.retain_only(FRAME_STATE_SLOT);
    }

    pub fn bind_texture(&mut self, slot: u32, texture: TextureId) {
        self.bindings.set(slot, Binding::Texture(texture));
    }

    pub fn bind_image(&mut self, slot: u32, texture: TextureId, access: Access) {
        self.bindings.set(slot, Binding::Image { texture, access });
    }

    pub fn bind_storage_buffer(&mut self, slot: u32, buffer: BufferId, writable: bool) {
        self.bindings
            .set(slot, Binding::StorageBuffer { buffer, writable });
    }

    pub fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferId) {
        self.bindings.set(slot, Binding::UniformBuffer(buffer));
    }

    pub fn unbind(&mut self, slot: u32) {
        debug_assert_ne!(slot, FRAME_STATE_SLOT, "frame state slot is permanent");
        self.bindings.unset(slot);
    }

    // --- Work ---

    pub fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        trace!("dispatch {groups_x}x{groups_y}x{groups_z}");
        self.device
            .dispatch(&self.bindings, [groups_x, groups_y, groups_z]);
    }

    pub fn memory_barrier(&mut self, flags: BarrierFlags) {
        self.device.memory_barrier(flags);
    }

    pub fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        trace!("render pass '{}'", desc.label);
        self.device.begin_render_pass(desc);
    }

    pub fn draw_indexed_indirect(&mut self, draw: &IndirectDraw) {
        self.device.draw_indexed_indirect(&self.bindings, draw);
    }

    pub fn draw_arrays(&mut self, vertex_count: u32, instance_count: u32) {
        self.device
            .draw_arrays(&self.bindings, vertex_count, instance_count);
    }

    pub fn end_render_pass(&mut self) {
        self.device.end_render_pass();
    }

    pub fn clear_texture(&mut self, texture: TextureId, value: Vec4) {
        self.device.clear_texture(texture, value);
    }

    pub fn present(&mut self, texture: TextureId) {
        self.device.present(texture);
    }
}
