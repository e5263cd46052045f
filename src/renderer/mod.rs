//! Rendering
//!
//! - [`core`]: the GPU resource layer ([`GpuDevice`](core::GpuDevice)), its
//!   headless and wgpu implementations, and the per-frame
//!   [`RenderContext`](core::RenderContext)
//! - [`scene_batch`]: merged scene geometry, GPU culling, indirect draws
//! - [`passes`]: the [`Effect`](passes::Effect) contract and every pass
//! - [`orchestrator`]: the frame loop and mode state machine
//! - [`frame`], [`settings`]: per-frame uniforms and startup configuration

pub mod core;
pub mod frame;
pub mod orchestrator;
pub mod passes;
pub mod scene_batch;
pub mod settings;

pub use frame::FrameState;
pub use orchestrator::FrameOrchestrator;
pub use passes::Effect;
pub use scene_batch::{MeshPatch, SceneBatch};
pub use settings::{
    AtmosphereSettings, ParticleSettings, PathTracerSettings, ProjectionSettings, RenderMode,
    RendererSettings, SsaoSettings, SsrSettings, VolumetricSettings,
};
