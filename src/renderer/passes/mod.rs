//! Render Passes
//!
//! Every viewport-sized pass implements [`Effect`]. An effect owns its
//! program and output textures, exposes named parameters whose setters
//! upload immediately (push-on-write), and records its work through a
//! [`RenderContext`](crate::renderer::core::RenderContext).
//!
//! A compute effect's `compute` call:
//! 1. binds its inputs and output
//! 2. dispatches one invocation per output texel, in pass-specific tiles
//! 3. issues a memory barrier scoped to how the next consumer reads the
//!    output
//!
//! The barrier is part of the contract: without it the consumer races the
//! writes.
//!
//! | Pass                     | Kind     | Tile | Output barrier                  |
//! |--------------------------|----------|------|---------------------------------|
//! | [`SsaoPass`]             | compute  | 8×8  | `TEXTURE_FETCH`                 |
//! | [`ForwardPass`]          | graphics | -    | (framebuffer)                   |
//! | [`ParticleSystem`]       | both     | 64   | `SHADER_STORAGE`                |
//! | [`VolumetricLighting`]   | compute  | 8×4  | `TEXTURE_FETCH`                 |
//! | [`SsrPass`]              | compute  | 8×8  | `TEXTURE_FETCH`                 |
//! | [`CompositePass`]        | compute  | 8×8  | `TEXTURE_FETCH`                 |
//! | [`PathTracer`]           | compute  | 8×8  | `TEXTURE_FETCH \| IMAGE_ACCESS` |
//!
//! [`PointShadow`] and [`AtmosphereEnvironment`] are not viewport sized and
//! therefore not effects.

pub mod atmosphere;
pub mod composite;
pub mod forward;
pub mod particles;
pub mod path_tracer;
pub mod shadow;
pub mod ssao;
pub mod ssr;
pub mod volumetric;

use smallvec::SmallVec;

pub use atmosphere::AtmosphereEnvironment;
pub use composite::CompositePass;
pub use forward::ForwardPass;
pub use particles::ParticleSystem;
pub use path_tracer::PathTracer;
pub use shadow::PointShadow;
pub use ssao::SsaoPass;
pub use ssr::SsrPass;
pub use volumetric::VolumetricLighting;

use crate::errors::Result;
use crate::renderer::core::{GpuDevice, TextureId};

/// A parameterized, viewport-sized GPU pass.
pub trait Effect {
    fn name(&self) -> &'static str;

    /// Textures that track the viewport size.
    fn outputs(&self) -> SmallVec<[TextureId; 4]>;

    /// Reallocates every output at `width` × `height`, keeping formats.
    fn set_size(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()>;
}

/// Reallocates each of `textures` at the new size.
pub(crate) fn resize_all(
    device: &mut dyn GpuDevice,
    textures: &[TextureId],
    width: u32,
    height: u32,
) -> Result<()> {
    for &texture in textures {
        device.resize_texture(texture, width, height)?;
    }
    Ok(())
}

/// Iterates over the texel coordinates covered by both the dispatch and the
/// image, like a shader's early-out on `coord >= size`.
pub(crate) fn covered_texels(extent: [u32; 2], size: (u32, u32)) -> impl Iterator<Item = (u32, u32)> {
    let w = extent[0].min(size.0);
    let h = extent[1].min(size.1);
    (0..h).flat_map(move |y| (0..w).map(move |x| (x, y)))
}

/// Normalized coordinates of a texel center.
#[inline]
pub(crate) fn texel_uv(x: u32, y: u32, size: (u32, u32)) -> glam::Vec2 {
    glam::Vec2::new(
        (x as f32 + 0.5) / size.0 as f32,
        (y as f32 + 0.5) / size.1 as f32,
    )
}
