//! Atmospheric Environment
//!
//! Renders a single-scattering Rayleigh sky into a cube map. The cube is
//! static: it is computed once at startup and again only after a parameter
//! change, then sampled by the forward pass, SSR and the path tracer.
//!
//! One dispatch covers all six faces (`z` = face index).

use glam::{Vec2, Vec3};

use crate::errors::Result;
use crate::renderer::core::{
    Access, BarrierFlags, GpuDevice, Invocation, ParamDecl, ProgramDesc, ProgramId,
    RenderContext, TextureDesc, TextureId, UniformKind, group_count,
};
use crate::renderer::settings::AtmosphereSettings;

const OUTPUT_SLOT: u32 = 1;

pub const TILE: [u32; 2] = [8, 8];

const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("inscattering_samples", UniformKind::U32),
    ParamDecl::new("density_samples", UniformKind::U32),
    ParamDecl::new("light_intensity", UniformKind::F32),
    ParamDecl::new("time", UniformKind::F32),
];

// Rayleigh coefficients per km and atmosphere geometry in km.
const BETA_RAYLEIGH: Vec3 = Vec3::new(5.8e-3, 13.5e-3, 33.1e-3);
const SCALE_HEIGHT: f32 = 8.0;
const ATMOSPHERE_HEIGHT: f32 = 100.0;

pub struct AtmosphereEnvironment {
    program: ProgramId,
    result: TextureId,
    settings: AtmosphereSettings,
    dirty: bool,
}

impl AtmosphereEnvironment {
    pub fn new(device: &mut dyn GpuDevice, settings: &AtmosphereSettings) -> Result<Self> {
        let program = device.create_program(
            &ProgramDesc::compute("atmosphere", TILE)
                .with_params(PARAMS)
                .with_reference(sky_kernel),
        )?;
        let result = device.create_texture(&TextureDesc::cube(
            "atmosphere_cube",
            settings.resolution,
            wgpu::TextureFormat::Rgba16Float,
        ))?;

        let mut env = Self {
            program,
            result,
            settings: *settings,
            dirty: true,
        };
        env.upload(device);
        Ok(env)
    }

    fn upload(&mut self, device: &mut dyn GpuDevice) {
        let s = self.settings;
        device.set_uniform(self.program, "inscattering_samples", s.inscattering_samples.into());
        device.set_uniform(self.program, "density_samples", s.density_samples.into());
        device.set_uniform(self.program, "light_intensity", s.light_intensity.into());
        device.set_uniform(self.program, "time", s.time.into());
        self.dirty = true;
    }

    #[must_use]
    pub fn settings(&self) -> &AtmosphereSettings {
        &self.settings
    }

    /// Uploads new parameters. The cube is stale until the next
    /// [`compute`](Self::compute); a resolution change reallocates it.
    pub fn set_settings(
        &mut self,
        device: &mut dyn GpuDevice,
        settings: &AtmosphereSettings,
    ) -> Result<()> {
        if settings.resolution != self.settings.resolution {
            device.resize_texture(self.result, settings.resolution, settings.resolution)?;
        }
        self.settings = *settings;
        self.upload(device);
        Ok(())
    }

    /// Whether parameters changed since the last [`compute`](Self::compute).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn result(&self) -> TextureId {
        self.result
    }

    pub fn compute(&mut self, ctx: &mut RenderContext<'_>) {
        let size = self.settings.resolution;

        ctx.use_program(self.program);
        ctx.reset_bindings();
        ctx.bind_image(OUTPUT_SLOT, self.result, Access::WriteOnly);
        ctx.dispatch(group_count(size, TILE[0]), group_count(size, TILE[1]), 6);
        ctx.memory_barrier(BarrierFlags::TEXTURE_FETCH);
        self.dirty = false;
    }
}

/// Direction through the center of a cube texel, inverse of the cube
/// lookup convention (+X, -X, +Y, -Y, +Z, -Z).
#[must_use]
pub fn face_direction(face: u32, uv: Vec2) -> Vec3 {
    let u = uv.x * 2.0 - 1.0;
    let v = uv.y * 2.0 - 1.0;
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
    .normalize()
}

fn density(height: f32) -> f32 {
    (-height / SCALE_HEIGHT).exp()
}

/// Optical depth from `height` to the top of the atmosphere along a ray
/// with vertical component `dir_y`.
fn optical_depth(height: f32, dir_y: f32, steps: u32) -> f32 {
    let length = (ATMOSPHERE_HEIGHT - height).max(0.0) / dir_y.max(0.02);
    let step = length / steps.max(1) as f32;
    (0..steps.max(1))
        .map(|i| density(height + (i as f32 + 0.5) * step * dir_y.max(0.02)) * step)
        .sum()
}

fn sky_radiance(dir: Vec3, sun: Vec3, view_samples: u32, sun_samples: u32, intensity: f32) -> Vec3 {
    let dir_y = dir.y.max(0.0);
    let length = ATMOSPHERE_HEIGHT / dir_y.max(0.02);
    let steps = view_samples.max(1);
    let step = length / steps as f32;

    let mut view_depth = 0.0;
    let mut scattered = Vec3::ZERO;
    for i in 0..steps {
        let h = (i as f32 + 0.5) * step * dir_y.max(0.02);
        let d = density(h) * step;
        view_depth += d;
        let sun_depth = optical_depth(h, sun.y, sun_samples);
        let attenuation = (-BETA_RAYLEIGH * (view_depth + sun_depth)).exp();
        scattered += attenuation * d;
    }

    let cos_theta = dir.dot(sun);
    let phase = 3.0 / (16.0 * std::f32::consts::PI) * (1.0 + cos_theta * cos_theta);
    scattered * BETA_RAYLEIGH * phase * intensity
}

fn sky_kernel(inv: &mut Invocation<'_>) {
    let view_samples = inv.u32("inscattering_samples");
    let sun_samples = inv.u32("density_samples");
    let intensity = inv.f32("light_intensity");
    let angle = inv.f32("time") * std::f32::consts::PI;
    let sun = Vec3::new(angle.cos(), angle.sin(), 0.0);

    let (w, h) = inv.image_size(OUTPUT_SLOT);
    let [ex, ey] = inv.extent();
    let faces = inv.groups()[2].min(6);
    for face in 0..faces {
        for y in 0..ey.min(h) {
            for x in 0..ex.min(w) {
                let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
                let dir = face_direction(face, uv);
                let color = sky_radiance(dir, sun, view_samples, sun_samples, intensity);
                inv.store_layer(OUTPUT_SLOT, x, y, face, color.extend(1.0));
            }
        }
    }
}
