//! Scene data consumed by the renderer
//!
//! - [`model`]: GPU-layout vertex / mesh / material / draw-command records
//!   and the transient [`Model`] a loader produces
//! - [`camera`]: the camera-controller contract and a fly camera
//! - [`light`]: point lights and their shadow settings

pub mod camera;
pub mod light;
pub mod model;

pub use camera::{CameraController, CameraInput, CameraSample, FlyCamera, StaticCamera};
pub use light::{GpuLight, PointLight, ShadowSettings, default_lights};
pub use model::{DrawCommand, Material, Mesh, Model, Vertex};
