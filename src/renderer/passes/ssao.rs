//! Screen-Space Ambient Occlusion
//!
//! Runs at the start of a rasterized frame against the *previous* frame's
//! depth and normal targets, so its result is ready for the forward pass
//! without a depth prepass.
//!
//! The hemisphere sample kernel is generated on the CPU with a fixed seed and
//! uploaded as a storage buffer; changing `samples` regenerates it.
//!
//! | Slot | Resource               | Access           |
//! |------|------------------------|------------------|
//! | 1    | occlusion (`R32Float`) | write-only image |
//! | 2    | forward depth          | texture fetch    |
//! | 3    | normal + specular      | texture fetch    |
//! | 4    | sample kernel          | storage (read)   |

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use smallvec::{SmallVec, smallvec};

use super::{Effect, covered_texels, texel_uv};
use crate::errors::Result;
use crate::renderer::core::{
    Access, BarrierFlags, BufferDesc, BufferId, GpuDevice, Invocation, ParamDecl, ProgramDesc,
    ProgramId, RenderContext, TextureDesc, TextureId, UniformKind, group_count,
};
use crate::renderer::settings::SsaoSettings;

const OUTPUT_SLOT: u32 = 1;
const DEPTH_SLOT: u32 = 2;
const NORMAL_SLOT: u32 = 3;
const KERNEL_SLOT: u32 = 4;

pub const TILE: [u32; 2] = [8, 8];

const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("samples", UniformKind::U32),
    ParamDecl::new("radius", UniformKind::F32),
    ParamDecl::new("strength", UniformKind::F32),
];

pub struct SsaoPass {
    program: ProgramId,
    result: TextureId,
    kernel: BufferId,

    samples: u32,
    radius: f32,
    strength: f32,
}

impl SsaoPass {
    pub fn new(
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
        settings: &SsaoSettings,
    ) -> Result<Self> {
        let program = device.create_program(
            &ProgramDesc::compute("ssao", TILE)
                .with_params(PARAMS)
                .with_reference(occlusion_kernel),
        )?;
        let result = device.create_texture(&TextureDesc::d2(
            "ssao_result",
            width,
            height,
            wgpu::TextureFormat::R32Float,
        ))?;
        let kernel =
            device.create_buffer(&BufferDesc::new("ssao_kernel", wgpu::BufferUsages::STORAGE))?;

        let mut pass = Self {
            program,
            result,
            kernel,
            samples: 0,
            radius: 0.0,
            strength: 0.0,
        };
        pass.set_samples(device, settings.samples)?;
        pass.set_radius(device, settings.radius);
        pass.set_strength(device, settings.strength);
        Ok(pass)
    }

    #[must_use]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Uploads the sample count and a matching sample kernel.
    pub fn set_samples(&mut self, device: &mut dyn GpuDevice, samples: u32) -> Result<()> {
        self.samples = samples;
        let kernel = generate_ssao_kernel(samples.max(1));
        device.allocate_buffer(self.kernel, bytemuck::cast_slice(&kernel))?;
        device.set_uniform(self.program, "samples", samples.into());
        Ok(())
    }

    #[must_use]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, device: &mut dyn GpuDevice, radius: f32) {
        self.radius = radius;
        device.set_uniform(self.program, "radius", radius.into());
    }

    #[must_use]
    pub fn strength(&self) -> f32 {
        self.strength
    }

    pub fn set_strength(&mut self, device: &mut dyn GpuDevice, strength: f32) {
        self.strength = strength;
        device.set_uniform(self.program, "strength", strength.into());
    }

    #[must_use]
    pub fn result(&self) -> TextureId {
        self.result
    }

    #[must_use]
    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn compute(&self, ctx: &mut RenderContext<'_>, depth: TextureId, normal_spec: TextureId) {
        let (width, height) = ctx.device().texture_desc(self.result).size();

        ctx.use_program(self.program);
        ctx.reset_bindings();
        ctx.bind_image(OUTPUT_SLOT, self.result, Access::WriteOnly);
        ctx.bind_texture(DEPTH_SLOT, depth);
        ctx.bind_texture(NORMAL_SLOT, normal_spec);
        ctx.bind_storage_buffer(KERNEL_SLOT, self.kernel, false);
        ctx.dispatch(group_count(width, TILE[0]), group_count(height, TILE[1]), 1);
        ctx.memory_barrier(BarrierFlags::TEXTURE_FETCH);
    }
}

impl Effect for SsaoPass {
    fn name(&self) -> &'static str {
        "ssao"
    }

    fn outputs(&self) -> SmallVec<[TextureId; 4]> {
        smallvec![self.result]
    }

    fn set_size(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()> {
        device.resize_texture(self.result, width, height)
    }
}

/// Generates a hemisphere sample kernel with importance-weighted distribution.
///
/// Uses a fixed seed so the kernel is identical across runs. Samples are
/// pulled towards the origin with a quadratic fall-off.
#[must_use]
pub fn generate_ssao_kernel(samples: u32) -> Vec<Vec4> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..samples)
        .map(|i| {
            let dir = Vec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(0.01..1.0),
            )
            .normalize();
            let t = i as f32 / samples as f32;
            let scale = 0.1 + 0.9 * t * t;
            (dir * rng.random_range(0.0..1.0f32) * scale).extend(0.0)
        })
        .collect()
}

fn occlusion_kernel(inv: &mut Invocation<'_>) {
    let frame = inv.frame_state();
    let samples = inv.u32("samples") as usize;
    let radius = inv.f32("radius");
    let strength = inv.f32("strength");
    let kernel: Vec<Vec4> = inv.read_buffer(KERNEL_SLOT);

    let size = inv.image_size(OUTPUT_SLOT);
    for (x, y) in covered_texels(inv.extent(), size) {
        let uv = texel_uv(x, y, size);
        let depth = inv.sample(DEPTH_SLOT, uv).x;
        let normal = inv.sample(NORMAL_SLOT, uv).xyz();
        if normal == Vec3::ZERO {
            inv.store(OUTPUT_SLOT, x, y, Vec4::ONE);
            continue;
        }
        let normal = normal.normalize();
        let origin = frame.unproject(uv, depth);
        let tangent = normal.any_orthonormal_vector();
        let bitangent = normal.cross(tangent);

        let mut occluded = 0.0;
        for k in kernel.iter().take(samples) {
            let p = origin + (tangent * k.x + bitangent * k.y + normal * k.z) * radius;
            let clip = frame.proj_view * p.extend(1.0);
            if clip.w <= 0.0 {
                continue;
            }
            let ndc = clip.xyz() / clip.w;
            let sample_uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            let scene_depth = inv.sample(DEPTH_SLOT, sample_uv).x;
            if scene_depth < ndc.z {
                occluded += 1.0;
            }
        }

        let ao = (1.0 - strength * occluded / samples.max(1) as f32).clamp(0.0, 1.0);
        inv.store(OUTPUT_SLOT, x, y, Vec4::splat(ao));
    }
}
