//! Screen-Space Reflections
//!
//! Marches the reflected view ray through the depth buffer in `samples`
//! linear steps up to `max_dist`, refines the first crossing with
//! `binary_search_samples` bisection steps, and falls back to the
//! environment cube when the ray leaves the screen. The result is weighted
//! by the surface's specular term.
//!
//! | Slot | Resource                    | Access           |
//! |------|-----------------------------|------------------|
//! | 1    | reflections (`Rgba16Float`) | write-only image |
//! | 2    | lit color                   | texture fetch    |
//! | 3    | normal + specular           | texture fetch    |
//! | 4    | depth                       | texture fetch    |
//! | 5    | environment cube            | texture fetch    |

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use smallvec::{SmallVec, smallvec};

use super::{Effect, covered_texels, texel_uv};
use crate::errors::Result;
use crate::renderer::core::{
    Access, BarrierFlags, GpuDevice, Invocation, ParamDecl, ProgramDesc, ProgramId,
    RenderContext, TextureDesc, TextureId, UniformKind, group_count,
};
use crate::renderer::frame::FrameState;
use crate::renderer::settings::SsrSettings;

const OUTPUT_SLOT: u32 = 1;
const COLOR_SLOT: u32 = 2;
const NORMAL_SLOT: u32 = 3;
const DEPTH_SLOT: u32 = 4;
const ENVIRONMENT_SLOT: u32 = 5;

pub const TILE: [u32; 2] = [8, 8];

const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("samples", UniformKind::U32),
    ParamDecl::new("binary_search_samples", UniformKind::U32),
    ParamDecl::new("max_dist", UniformKind::F32),
];

pub struct SsrPass {
    program: ProgramId,
    result: TextureId,

    samples: u32,
    binary_search_samples: u32,
    max_dist: f32,
}

impl SsrPass {
    pub fn new(
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
        settings: &SsrSettings,
    ) -> Result<Self> {
        let program = device.create_program(
            &ProgramDesc::compute("ssr", TILE)
                .with_params(PARAMS)
                .with_reference(reflection_kernel),
        )?;
        let result = device.create_texture(&TextureDesc::d2(
            "ssr_result",
            width,
            height,
            wgpu::TextureFormat::Rgba16Float,
        ))?;

        let mut pass = Self {
            program,
            result,
            samples: 0,
            binary_search_samples: 0,
            max_dist: 0.0,
        };
        pass.set_samples(device, settings.samples);
        pass.set_binary_search_samples(device, settings.binary_search_samples);
        pass.set_max_dist(device, settings.max_dist);
        Ok(pass)
    }

    #[must_use]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn set_samples(&mut self, device: &mut dyn GpuDevice, samples: u32) {
        self.samples = samples;
        device.set_uniform(self.program, "samples", samples.into());
    }

    #[must_use]
    pub fn binary_search_samples(&self) -> u32 {
        self.binary_search_samples
    }

    pub fn set_binary_search_samples(&mut self, device: &mut dyn GpuDevice, samples: u32) {
        self.binary_search_samples = samples;
        device.set_uniform(self.program, "binary_search_samples", samples.into());
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
    pub fn result(&self) -> TextureId {
        self.result
    }

    pub fn compute(
        &self,
        ctx: &mut RenderContext<'_>,
        color: TextureId,
        normal_spec: TextureId,
        depth: TextureId,
        environment: TextureId,
    ) {
        let (width, height) = ctx.device().texture_desc(self.result).size();

        ctx.use_program(self.program);
        ctx.reset_bindings();
        ctx.bind_image(OUTPUT_SLOT, self.result, Access::WriteOnly);
        ctx.bind_texture(COLOR_SLOT, color);
        ctx.bind_texture(NORMAL_SLOT, normal_spec);
        ctx.bind_texture(DEPTH_SLOT, depth);
        ctx.bind_texture(ENVIRONMENT_SLOT, environment);
        ctx.dispatch(group_count(width, TILE[0]), group_count(height, TILE[1]), 1);
        ctx.memory_barrier(BarrierFlags::TEXTURE_FETCH);
    }
}

impl Effect for SsrPass {
    fn name(&self) -> &'static str {
        "ssr"
    }

    fn outputs(&self) -> SmallVec<[TextureId; 4]> {
        smallvec![self.result]
    }

    fn set_size(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()> {
        device.resize_texture(self.result, width, height)
    }
}

/// Screen position (uv, ndc depth) of a world point, if in front of the camera.
fn project(frame: &FrameState, p: Vec3) -> Option<(Vec2, f32)> {
    let clip = frame.proj_view * p.extend(1.0);
    if clip.w <= 0.0 {
        return None;
    }
    let ndc = clip.xyz() / clip.w;
    Some((Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5), ndc.z))
}

fn on_screen(uv: Vec2) -> bool {
    (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y)
}

fn reflection_kernel(inv: &mut Invocation<'_>) {
    let frame = inv.frame_state();
    let samples = inv.u32("samples").max(1);
    let refine = inv.u32("binary_search_samples");
    let max_dist = inv.f32("max_dist");

    let size = inv.image_size(OUTPUT_SLOT);
    for (x, y) in covered_texels(inv.extent(), size) {
        let uv = texel_uv(x, y, size);
        let normal_spec = inv.sample(NORMAL_SLOT, uv);
        let specular = normal_spec.w;
        if specular <= 0.0 || normal_spec.xyz() == Vec3::ZERO {
            inv.store(OUTPUT_SLOT, x, y, Vec4::ZERO);
            continue;
        }

        let origin = frame.unproject(uv, inv.sample(DEPTH_SLOT, uv).x);
        let view_dir = (origin - frame.camera_pos).normalize_or_zero();
        let dir = view_dir.reflect(normal_spec.xyz().normalize());
        let step = dir * (max_dist / samples as f32);

        let mut hit = None;
        let mut prev = origin;
        for i in 1..=samples {
            let p = origin + step * i as f32;
            let Some((p_uv, p_depth)) = project(&frame, p) else {
                break;
            };
            if !on_screen(p_uv) {
                break;
            }
            if inv.sample(DEPTH_SLOT, p_uv).x < p_depth {
                // Bisect between the last point in front and the first behind.
                let (mut lo, mut hi) = (prev, p);
                for _ in 0..refine {
                    let mid = (lo + hi) * 0.5;
                    match project(&frame, mid) {
                        Some((m_uv, m_depth)) if inv.sample(DEPTH_SLOT, m_uv).x < m_depth => {
                            hi = mid;
                        }
                        _ => lo = mid,
                    }
                }
                hit = project(&frame, hi).map(|(h_uv, _)| h_uv);
                break;
            }
            prev = p;
        }

        let reflected = match hit {
            Some(h_uv) => inv.sample(COLOR_SLOT, h_uv).xyz(),
            None => inv.sample_cube(ENVIRONMENT_SLOT, dir).xyz(),
        };
        inv.store(OUTPUT_SLOT, x, y, (reflected * specular).extend(1.0));
    }
}
