//! Composite
//!
//! Final combine: `color + volumetric? + reflections?`. Optional inputs are
//! switched with the `use_volumetric` / `use_reflections` flags; with both
//! off the pass is a passthrough (path-traced mode).
//!
//! | Slot | Resource                 | Access           |
//! |------|--------------------------|------------------|
//! | 1    | final image (`Rgba8Unorm`) | write-only image |
//! | 2    | color                    | texture fetch    |
//! | 3    | volumetric (optional)    | texture fetch    |
//! | 4    | reflections (optional)   | texture fetch    |

use glam::{Vec3, Vec4Swizzles};
use smallvec::{SmallVec, smallvec};

use super::{Effect, covered_texels, texel_uv};
use crate::errors::Result;
use crate::renderer::core::{
    Access, BarrierFlags, GpuDevice, Invocation, ParamDecl, ProgramDesc, ProgramId,
    RenderContext, TextureDesc, TextureId, UniformKind, group_count,
};

const OUTPUT_SLOT: u32 = 1;
const COLOR_SLOT: u32 = 2;
const VOLUMETRIC_SLOT: u32 = 3;
const REFLECTION_SLOT: u32 = 4;

pub const TILE: [u32; 2] = [8, 8];

const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("use_volumetric", UniformKind::Bool),
    ParamDecl::new("use_reflections", UniformKind::Bool),
];

pub struct CompositePass {
    program: ProgramId,
    result: TextureId,
}

impl CompositePass {
    pub fn new(device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<Self> {
        let program = device.create_program(
            &ProgramDesc::compute("composite", TILE)
                .with_params(PARAMS)
                .with_reference(combine_kernel),
        )?;
        let result = device.create_texture(&TextureDesc::d2(
            "composite_result",
            width,
            height,
            wgpu::TextureFormat::Rgba8Unorm,
        ))?;
        Ok(Self { program, result })
    }

    #[must_use]
    pub fn result(&self) -> TextureId {
        self.result
    }

    pub fn compute(
        &self,
        ctx: &mut RenderContext<'_>,
        color: TextureId,
        volumetric: Option<TextureId>,
        reflections: Option<TextureId>,
    ) {
        let (width, height) = ctx.device().texture_desc(self.result).size();

        ctx.use_program(self.program);
        let device = ctx.device();
        device.set_uniform(self.program, "use_volumetric", volumetric.is_some().into());
        device.set_uniform(self.program, "use_reflections", reflections.is_some().into());

        ctx.reset_bindings();
        ctx.bind_image(OUTPUT_SLOT, self.result, Access::WriteOnly);
        ctx.bind_texture(COLOR_SLOT, color);
        if let Some(v) = volumetric {
            ctx.bind_texture(VOLUMETRIC_SLOT, v);
        }
        if let Some(r) = reflections {
            ctx.bind_texture(REFLECTION_SLOT, r);
        }
        ctx.dispatch(group_count(width, TILE[0]), group_count(height, TILE[1]), 1);
        ctx.memory_barrier(BarrierFlags::TEXTURE_FETCH);
    }
}

impl Effect for CompositePass {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn outputs(&self) -> SmallVec<[TextureId; 4]> {
        smallvec![self.result]
    }

    fn set_size(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()> {
        device.resize_texture(self.result, width, height)
    }
}

fn combine_kernel(inv: &mut Invocation<'_>) {
    let use_volumetric = inv.bool("use_volumetric");
    let use_reflections = inv.bool("use_reflections");

    let size = inv.image_size(OUTPUT_SLOT);
    for (x, y) in covered_texels(inv.extent(), size) {
        let uv = texel_uv(x, y, size);
        let mut rgb = inv.sample(COLOR_SLOT, uv).xyz();
        if use_volumetric {
            rgb += inv.sample(VOLUMETRIC_SLOT, uv).xyz();
        }
        if use_reflections {
            rgb += inv.sample(REFLECTION_SLOT, uv).xyz();
        }
        inv.store(OUTPUT_SLOT, x, y, rgb.clamp(Vec3::ZERO, Vec3::ONE).extend(1.0));
    }
}
