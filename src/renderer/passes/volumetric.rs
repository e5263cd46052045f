//! Volumetric Lighting
//!
//! Screen-space single-scattering fog. For each pixel a ray is marched from
//! the camera towards the surface reconstructed from the depth buffer,
//! capped at `max_dist`, accumulating in-scattered light attenuated by the
//! per-channel `absorbance`. The result is an additive term the composite
//! pass adds onto the lit color.
//!
//! # Bindings
//!
//! | Slot | Resource                    | Access           |
//! |------|-----------------------------|------------------|
//! | 0    | frame state                 | uniform          |
//! | 1    | scattering (`Rgba16Float`)  | write-only image |
//! | 2    | forward depth               | texture fetch    |
//!
//! # Parameters
//!
//! `samples` (u32), `scattering` (f32), `max_dist` (f32), `absorbance` (vec3).
//! Setters upload at once.

use glam::Vec3;
use smallvec::{SmallVec, smallvec};

use super::{Effect, covered_texels, texel_uv};
use crate::errors::Result;
use crate::renderer::core::{
    Access, BarrierFlags, GpuDevice, Invocation, ParamDecl, ProgramDesc, ProgramId,
    RenderContext, TextureDesc, TextureId, UniformKind, group_count,
};
use crate::renderer::settings::VolumetricSettings;

const OUTPUT_SLOT: u32 = 1;
const DEPTH_SLOT: u32 = 2;

pub const TILE: [u32; 2] = [8, 4];
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("samples", UniformKind::U32),
    ParamDecl::new("scattering", UniformKind::F32),
    ParamDecl::new("max_dist", UniformKind::F32),
    ParamDecl::new("absorbance", UniformKind::Vec3),
];

pub struct VolumetricLighting {
    program: ProgramId,
    result: TextureId,

    samples: u32,
    scattering: f32,
    max_dist: f32,
    absorbance: Vec3,
}

impl VolumetricLighting {
    pub fn new(
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
        settings: &VolumetricSettings,
    ) -> Result<Self> {
        let program = device.create_program(
            &ProgramDesc::compute("volumetric_lighting", TILE)
                .with_params(PARAMS)
                .with_reference(ray_march_kernel),
        )?;
        let result = device.create_texture(&TextureDesc::d2(
            "volumetric_result",
            width,
            height,
            OUTPUT_FORMAT,
        ))?;

        let mut pass = Self {
            program,
            result,
            samples: 0,
            scattering: 0.0,
            max_dist: 0.0,
            absorbance: Vec3::ZERO,
        };
        pass.set_samples(device, settings.samples);
        pass.set_scattering(device, settings.scattering);
        pass.set_max_dist(device, settings.max_dist);
        pass.set_absorbance(device, Vec3::from(settings.absorbance));
        Ok(pass)
    }

    // --- Parameters ---

    #[must_use]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn set_samples(&mut self, device: &mut dyn GpuDevice, samples: u32) {
        self.samples = samples;
        device.set_uniform(self.program, "samples", samples.into());
    }

    #[must_use]
    pub fn scattering(&self) -> f32 {
        self.scattering
    }

    pub fn set_scattering(&mut self, device: &mut dyn GpuDevice, scattering: f32) {
        self.scattering = scattering;
        device.set_uniform(self.program, "scattering", scattering.into());
    }

    #[must_use]
    pub fn max_dist(&self) -> f32 {
        self.max_dist
    }

    pub fn set_max_dist(&mut self, device: &mut dyn GpuDevice, max_dist: f32) {
        self.max_dist = max_dist;
        device.set_uniform(self.program, "max_dist", max_dist.into());
    }

    #[must_use]
    pub fn absorbance(&self) -> Vec3 {
        self.absorbance
    }

    pub fn set_absorbance(&mut self, device: &mut dyn GpuDevice, absorbance: Vec3) {
        self.absorbance = absorbance;
        device.set_uniform(self.program, "absorbance", absorbance.into());
    }

    // --- Work ---

    #[must_use]
    pub fn result(&self) -> TextureId {
        self.result
    }

    #[must_use]
    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Writes the scattering term for the current frame and makes it
    /// visible to texture fetches.
    pub fn compute(&self, ctx: &mut RenderContext<'_>, depth: TextureId) {
        let (width, height) = ctx.device().texture_desc(self.result).size();

        ctx.use_program(self.program);
        ctx.reset_bindings();
        ctx.bind_image(OUTPUT_SLOT, self.result, Access::WriteOnly);
        ctx.bind_texture(DEPTH_SLOT, depth);
        ctx.dispatch(group_count(width, TILE[0]), group_count(height, TILE[1]), 1);
        ctx.memory_barrier(BarrierFlags::TEXTURE_FETCH);
    }
}

impl Effect for VolumetricLighting {
    fn name(&self) -> &'static str {
        "volumetric_lighting"
    }

    fn outputs(&self) -> SmallVec<[TextureId; 4]> {
        smallvec![self.result]
    }

    fn set_size(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()> {
        device.resize_texture(self.result, width, height)
    }
}

/// Henyey-Greenstein phase function.
fn phase(g: f32, cos_theta: f32) -> f32 {
    let g2 = g * g;
    (1.0 - g2) / (4.0 * std::f32::consts::PI * (1.0 + g2 - 2.0 * g * cos_theta).powf(1.5))
}

fn ray_march_kernel(inv: &mut Invocation<'_>) {
    let frame = inv.frame_state();
    let samples = inv.u32("samples").max(1);
    let g = inv.f32("scattering");
    let max_dist = inv.f32("max_dist");
    let absorbance = inv.vec3("absorbance");

    let size = inv.image_size(OUTPUT_SLOT);
    // Light arrives from above; only the phase angle depends on the view ray.
    let light_dir = Vec3::Y;

    for (x, y) in covered_texels(inv.extent(), size) {
        let depth = inv.load(DEPTH_SLOT, x, y).x;
        let target = frame.unproject(texel_uv(x, y, size), depth);
        let to_target = target - frame.camera_pos;
        let dist = to_target.length().min(max_dist);
        let dir = to_target.normalize_or_zero();

        let step = dist / samples as f32;
        let p = phase(g, dir.dot(light_dir));
        let mut transmittance = Vec3::ONE;
        let mut scattered = Vec3::ZERO;
        for _ in 0..samples {
            scattered += transmittance * absorbance * p * step;
            transmittance *= (-absorbance * step).exp();
        }

        inv.store(OUTPUT_SLOT, x, y, scattered.extend(1.0));
    }
}
