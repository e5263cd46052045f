//! GPU Device Abstraction
//!
//! [`GpuDevice`] is the narrow resource layer the frame pipeline is written
//! against. It owns buffers, textures and programs, accepts slot bindings,
//! and records dispatches, barriers, render passes and indirect draws.
//!
//! Two implementations ship with the crate:
//! - [`HeadlessDevice`](super::headless::HeadlessDevice): CPU reference
//!   device with a command log, bounds checks and hazard tracking
//! - `WgpuDevice` (feature `wgpu-backend`): wgpu on a caller-supplied
//!   device / queue
//!
//! Resource handles are plain slotmap keys. Destroying a resource
//! invalidates its key; using a stale key is a programming error.

use glam::Vec4;

use super::resources::{
    BarrierFlags, BufferDesc, BufferId, Bindings, IndirectDraw, ProgramDesc, ProgramId,
    RenderPassDesc, TextureDesc, TextureId, UniformValue,
};
use crate::errors::{LumenError, Result};

/// Feature set reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Multi-draw-indirect from a GPU-resident command buffer.
    pub multi_draw_indirect: bool,
    /// Read / write storage images from compute programs.
    pub storage_images: bool,
    /// Largest supported 2D texture edge.
    pub max_texture_dimension: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            multi_draw_indirect: true,
            storage_images: true,
            max_texture_dimension: 8192,
        }
    }
}

impl Capabilities {
    /// Fails with [`LumenError::MissingCapability`] naming the first
    /// missing feature.
    pub fn require_pipeline_features(&self) -> Result<()> {
        if !self.multi_draw_indirect {
            return Err(LumenError::MissingCapability("multi-draw-indirect"));
        }
        if !self.storage_images {
            return Err(LumenError::MissingCapability("storage images"));
        }
        Ok(())
    }
}

/// Resource and command interface the renderer drives.
///
/// Commands are recorded in call order and execute in that order. Writes
/// made by a dispatch only become visible to a later consumer after a
/// [`memory_barrier`](Self::memory_barrier) covering that consumer's
/// access kind.
pub trait GpuDevice {
    fn capabilities(&self) -> Capabilities;

    // --- Buffers ---

    /// Creates a buffer. A zero `size` defers allocation to the first
    /// [`allocate_buffer`](Self::allocate_buffer).
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId>;

    /// Reallocates `buffer` to exactly `data.len()` bytes and uploads `data`.
    fn allocate_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()>;

    /// Writes `data` at `offset`.
    ///
    /// # Panics
    /// When the range exceeds the current allocation.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    fn buffer_size(&self, buffer: BufferId) -> u64;

    fn destroy_buffer(&mut self, buffer: BufferId);

    // --- Textures ---

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;

    /// Reallocates `texture` at a new size, keeping its format and kind.
    /// Contents are undefined afterwards.
    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> Result<()>;

    fn texture_desc(&self, texture: TextureId) -> &TextureDesc;

    /// Fills every texel of every layer with `value`.
    fn clear_texture(&mut self, texture: TextureId, value: Vec4);

    fn destroy_texture(&mut self, texture: TextureId);

    // --- Programs ---

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId>;

    /// Makes `program` current for subsequent dispatches and draws.
    fn use_program(&mut self, program: ProgramId);

    /// Writes a declared parameter of `program`. Takes effect for every
    /// later command using the program.
    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue);

    // --- Commands ---

    /// Runs the current compute program over `groups` workgroups.
    fn dispatch(&mut self, bindings: &Bindings, groups: [u32; 3]);

    fn memory_barrier(&mut self, flags: BarrierFlags);

    fn begin_render_pass(&mut self, desc: &RenderPassDesc);

    /// One multi-draw: `draw.draw_count` indexed commands read from
    /// `draw.indirect_buffer`.
    fn draw_indexed_indirect(&mut self, bindings: &Bindings, draw: &IndirectDraw);

    /// Non-indexed draw of `vertex_count` vertices, `instance_count` times.
    fn draw_arrays(&mut self, bindings: &Bindings, vertex_count: u32, instance_count: u32);

    fn end_render_pass(&mut self);

    /// Copies `texture` to the presentation target and ends the frame.
    fn present(&mut self, texture: TextureId);
}
