//! Forward Lighting
//!
//! Draws the culled scene batch once with full lighting into four
//! viewport-sized targets consumed by the screen-space effects:
//!
//! | Target        | Format         | Consumers                     |
//! |---------------|----------------|-------------------------------|
//! | `color`       | `Rgba16Float`  | SSR, composite, particles     |
//! | `depth`       | `Depth32Float` | SSAO, volumetric, SSR         |
//! | `normal_spec` | `Rgba16Float`  | SSAO, SSR (`w` = specular)    |
//! | `object_id`   | `R32Uint`      | picking                       |
//!
//! Bindings: batch buffers at 1-5, environment cube at 6, ambient occlusion
//! at 7, the light buffer at 8 and up to [`MAX_SHADOW_MAPS`] cube shadow
//! maps from 9.

use glam::Vec4;
use log::debug;
use smallvec::{SmallVec, smallvec};

use super::{Effect, resize_all};
use crate::errors::Result;
use crate::renderer::core::{
    BufferDesc, BufferId, DepthAttachment, GpuDevice, GraphicsState, ParamDecl, ProgramDesc,
    ProgramId, RenderContext, RenderPassDesc, TextureDesc, TextureId, UniformKind, VertexInput,
};
use crate::renderer::scene_batch::SceneBatch;
use crate::scene::light::{GpuLight, PointLight};

const ENVIRONMENT_SLOT: u32 = 6;
const AO_SLOT: u32 = 7;
const LIGHT_SLOT: u32 = 8;
const SHADOW_SLOT: u32 = 9;

pub const MAX_SHADOW_MAPS: usize = 4;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const NORMAL_SPEC_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const OBJECT_ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("use_ao", UniformKind::Bool),
    ParamDecl::new("light_count", UniformKind::U32),
    ParamDecl::new("shadow_count", UniformKind::U32),
];

const STATE: GraphicsState = GraphicsState {
    color_formats: &[COLOR_FORMAT, NORMAL_SPEC_FORMAT, OBJECT_ID_FORMAT],
    depth_format: Some(DEPTH_FORMAT),
    depth_write: true,
    depth_compare: wgpu::CompareFunction::Less,
    alpha_blend: false,
    topology: wgpu::PrimitiveTopology::TriangleList,
    vertex_input: VertexInput::SceneVertex,
};

pub struct ForwardPass {
    program: ProgramId,

    color: TextureId,
    depth: TextureId,
    normal_spec: TextureId,
    object_id: TextureId,

    light_buffer: BufferId,
    light_count: u32,
}

impl ForwardPass {
    pub fn new(device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<Self> {
        let program = device
            .create_program(&ProgramDesc::graphics("forward", STATE).with_params(PARAMS))?;

        let color = device.create_texture(&TextureDesc::d2("forward_color", width, height, COLOR_FORMAT))?;
        let depth = device.create_texture(&TextureDesc::d2("forward_depth", width, height, DEPTH_FORMAT))?;
        let normal_spec = device.create_texture(&TextureDesc::d2(
            "forward_normal_spec",
            width,
            height,
            NORMAL_SPEC_FORMAT,
        ))?;
        let object_id = device.create_texture(&TextureDesc::d2(
            "forward_object_id",
            width,
            height,
            OBJECT_ID_FORMAT,
        ))?;

        let light_buffer =
            device.create_buffer(&BufferDesc::new("lights", wgpu::BufferUsages::STORAGE))?;

        device.set_uniform(program, "light_count", 0u32.into());
        Ok(Self {
            program,
            color,
            depth,
            normal_spec,
            object_id,
            light_buffer,
            light_count: 0,
        })
    }

    /// Replaces the light buffer contents.
    pub fn set_lights(&mut self, device: &mut dyn GpuDevice, lights: &[PointLight]) -> Result<()> {
        let gpu: Vec<GpuLight> = lights.iter().map(PointLight::to_gpu).collect();
        device.allocate_buffer(self.light_buffer, bytemuck::cast_slice(&gpu))?;
        self.light_count = lights.len() as u32;
        device.set_uniform(self.program, "light_count", self.light_count.into());
        debug!("Forward: {} lights uploaded", self.light_count);
        Ok(())
    }

    #[must_use]
    pub fn light_count(&self) -> u32 {
        self.light_count
    }

    #[must_use]
    pub fn light_buffer(&self) -> BufferId {
        self.light_buffer
    }

    #[must_use]
    pub fn program(&self) -> ProgramId {
        self.program
    }

    #[must_use]
    pub fn color(&self) -> TextureId {
        self.color
    }

    #[must_use]
    pub fn depth(&self) -> TextureId {
        self.depth
    }

    #[must_use]
    pub fn normal_spec(&self) -> TextureId {
        self.normal_spec
    }

    #[must_use]
    pub fn object_id(&self) -> TextureId {
        self.object_id
    }

    /// Clears all targets and draws the batch with the instance counts of
    /// the preceding view cull.
    ///
    /// # Panics
    /// With more than [`MAX_SHADOW_MAPS`] shadow maps.
    pub fn render(
        &self,
        ctx: &mut RenderContext<'_>,
        batch: &SceneBatch,
        environment: TextureId,
        ao: Option<TextureId>,
        shadow_maps: &[TextureId],
    ) {
        assert!(
            shadow_maps.len() <= MAX_SHADOW_MAPS,
            "{} shadow maps bound, at most {MAX_SHADOW_MAPS} supported",
            shadow_maps.len()
        );

        let device = ctx.device();
        device.set_uniform(self.program, "use_ao", ao.is_some().into());
        device.set_uniform(self.program, "shadow_count", (shadow_maps.len() as u32).into());

        ctx.begin_render_pass(
            &RenderPassDesc::new("forward")
                .with_color(self.color, Some(Vec4::ZERO))
                .with_color(self.normal_spec, Some(Vec4::ZERO))
                .with_color(self.object_id, Some(Vec4::ZERO))
                .with_depth(DepthAttachment {
                    texture: self.depth,
                    clear: Some(1.0),
                    read_only: false,
                    layer: None,
                }),
        );
        ctx.use_program(self.program);
        ctx.reset_bindings();
        ctx.bind_texture(ENVIRONMENT_SLOT, environment);
        if let Some(ao) = ao {
            ctx.bind_texture(AO_SLOT, ao);
        }
        ctx.bind_storage_buffer(LIGHT_SLOT, self.light_buffer, false);
        for (i, &map) in shadow_maps.iter().enumerate() {
            ctx.bind_texture(SHADOW_SLOT + i as u32, map);
        }
        batch.draw(ctx);
        ctx.end_render_pass();
    }
}

impl Effect for ForwardPass {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn outputs(&self) -> SmallVec<[TextureId; 4]> {
        smallvec![self.color, self.depth, self.normal_spec, self.object_id]
    }

    fn set_size(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()> {
        resize_all(device, &self.outputs(), width, height)
    }
}
