#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Lumen: the frame pipeline of a hybrid rasterizer / progressive path
//! tracer.
//!
//! The crate is written against a narrow GPU resource layer
//! ([`GpuDevice`](renderer::core::GpuDevice)). [`HeadlessDevice`] runs every
//! compute pass on the CPU and records what the pipeline asks of the GPU,
//! so the whole frame loop can be driven without a graphics adapter:
//!
//! ```rust,ignore
//! use lumen::{FrameOrchestrator, HeadlessDevice, RendererSettings, StaticCamera};
//!
//! let mut frames = FrameOrchestrator::new(HeadlessDevice::new(), RendererSettings::default(), 320, 180)?;
//! let mut camera = StaticCamera::looking_at(glam::Vec3::new(0.0, 5.0, 10.0), glam::Vec3::ZERO);
//! frames.on_update(1.0 / 60.0, &mut camera);
//! frames.on_render(1.0 / 60.0);
//! ```

pub mod errors;
pub mod renderer;
pub mod scene;
pub mod utils;

pub use errors::{LumenError, Result};
pub use renderer::core::{Capabilities, GpuDevice, HeadlessDevice, RenderContext};
#[cfg(feature = "wgpu-backend")]
pub use renderer::core::WgpuDevice;
pub use renderer::{
    Effect, FrameOrchestrator, FrameState, MeshPatch, RenderMode, RendererSettings, SceneBatch,
};
pub use scene::{
    CameraController, CameraInput, CameraSample, DrawCommand, FlyCamera, Material, Mesh, Model,
    PointLight, ShadowSettings, StaticCamera, Vertex,
};
