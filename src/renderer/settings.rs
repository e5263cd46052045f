//! Renderer Settings & Render Mode
//!
//! [`RendererSettings`] is consumed once by
//! [`FrameOrchestrator::new`](crate::renderer::FrameOrchestrator::new) to
//! pick the initial [`RenderMode`], build the projection and seed every
//! effect's parameters. Settings can be built in code or loaded from JSON:
//!
//! ```rust,ignore
//! use lumen::renderer::{RendererSettings, RenderMode};
//!
//! let settings = RendererSettings::from_json_str(r#"{
//!     "mode": "path_traced",
//!     "ssr": { "enabled": true }
//! }"#)?;
//! assert_eq!(settings.mode, RenderMode::PathTraced);
//! ```
//!
//! Missing keys fall back to [`Default`]; unknown keys are rejected so that
//! typos do not silently keep a default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

// ---------------------------------------------------------------------------
// RenderMode
// ---------------------------------------------------------------------------

/// The two mutually exclusive ways a frame is produced.
///
/// | Mode         | Passes                                                        |
/// |--------------|---------------------------------------------------------------|
/// | `Rasterized` | SSAO → shadows → cull → forward → particles → volumetrics → SSR → composite |
/// | `PathTraced` | path tracer → composite (passthrough)                          |
///
/// Switching only happens on explicit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Rasterized,
    PathTraced,
}

impl RenderMode {
    #[inline]
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Rasterized => Self::PathTraced,
            Self::PathTraced => Self::Rasterized,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-effect settings
// ---------------------------------------------------------------------------

/// Perspective projection. The aspect ratio always comes from the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionSettings {
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            fov_y_degrees: 102.0,
            near: 0.01,
            far: 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SsaoSettings {
    pub enabled: bool,
    pub samples: u32,
    /// World-space sampling radius.
    pub radius: f32,
    pub strength: f32,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            samples: 16,
            radius: 0.25,
            strength: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumetricSettings {
    pub enabled: bool,
    /// Ray-march steps per pixel.
    pub samples: u32,
    /// Henyey-Greenstein anisotropy in `(-1, 1)`.
    pub scattering: f32,
    /// March distance cap in world units.
    pub max_dist: f32,
    /// Per-channel extinction coefficient.
    pub absorbance: [f32; 3],
}

impl Default for VolumetricSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            samples: 20,
            scattering: 0.758,
            max_dist: 50.0,
            absorbance: [0.025; 3],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SsrSettings {
    pub enabled: bool,
    pub samples: u32,
    pub binary_search_samples: u32,
    pub max_dist: f32,
}

impl Default for SsrSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            samples: 30,
            binary_search_samples: 8,
            max_dist: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathTracerSettings {
    /// Maximum bounces per path.
    pub ray_depth: u32,
    pub focal_length: f32,
    /// Thin-lens aperture; 0 disables depth of field.
    pub aperture_diameter: f32,
}

impl Default for PathTracerSettings {
    fn default() -> Self {
        Self {
            ray_depth: 6,
            focal_length: 10.0,
            aperture_diameter: 0.03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AtmosphereSettings {
    /// Edge length of each cube face.
    pub resolution: u32,
    pub inscattering_samples: u32,
    pub density_samples: u32,
    pub light_intensity: f32,
    /// Sun position along its daily arc, `0..1`.
    pub time: f32,
}

impl Default for AtmosphereSettings {
    fn default() -> Self {
        Self {
            resolution: 256,
            inscattering_samples: 40,
            density_samples: 8,
            light_intensity: 15.0,
            time: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParticleSettings {
    pub count: u32,
    /// Particles spawn uniformly in `[-extent, extent]³`.
    pub spawn_extent: f32,
    /// Seed of the spawn distribution.
    pub seed: u64,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            count: 1000,
            spawn_extent: 20.0,
            seed: 7,
        }
    }
}

// ---------------------------------------------------------------------------
// RendererSettings
// ---------------------------------------------------------------------------

/// Initial configuration of the frame pipeline.
///
/// | Field         | Default                                   |
/// |---------------|-------------------------------------------|
/// | `mode`        | `Rasterized`                              |
/// | `projection`  | 102° fov, near 0.01, far 500               |
/// | `ssao`        | on, 16 samples, radius 0.25, strength 2    |
/// | `volumetric`  | on, 20 samples, g 0.758, 50 units          |
/// | `ssr`         | off, 30 samples, 8 refinement steps        |
/// | `path_tracer` | depth 6, focal length 10, aperture 0.03    |
/// | `atmosphere`  | 256² cube                                 |
/// | `particles`   | 1000 in a 40-unit cube                     |
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererSettings {
    pub mode: RenderMode,
    pub projection: ProjectionSettings,
    pub ssao: SsaoSettings,
    pub volumetric: VolumetricSettings,
    pub ssr: SsrSettings,
    pub path_tracer: PathTracerSettings,
    pub atmosphere: AtmosphereSettings,
    pub particles: ParticleSettings,
}

impl RendererSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json_str(&text)?;
        log::info!("Loaded renderer settings from {}", path.as_ref().display());
        Ok(settings)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
