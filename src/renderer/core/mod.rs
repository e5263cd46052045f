//! GPU resource layer
//!
//! - [`GpuDevice`]: the device contract every pass is written against
//! - [`HeadlessDevice`]: CPU reference device
//! - `WgpuDevice` (feature `wgpu-backend`): wgpu implementation
//! - [`RenderContext`]: per-frame bound-state tracker
//! - [`resources`]: ids, descriptors, bindings and barrier flags

pub mod context;
pub mod device;
pub mod headless;
pub mod resources;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_device;

pub use context::RenderContext;
pub use device::{Capabilities, GpuDevice};
pub use headless::{Command, Hazard, HeadlessDevice, Invocation, ResourceRef, TexelImage};
pub use resources::{
    Access, BarrierFlags, Binding, Bindings, BufferDesc, BufferId, ColorAttachment,
    DepthAttachment, GraphicsState, IndirectDraw, ParamDecl, ProgramDesc, ProgramId,
    ProgramStage, ReferenceKernel, RenderPassDesc, TextureDesc, TextureId, TextureKind,
    UniformKind, UniformValue, VertexInput, FRAME_STATE_SLOT, group_count,
};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_device::{ParamBlockLayout, ShaderLibrary, WgpuDevice};
