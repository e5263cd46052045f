//! Point Light Shadows
//!
//! One cube depth map per shadow-casting light. Each frame:
//! 1. a culling dispatch keeps only meshes whose world bounds intersect the
//!    light's range sphere (written into the shared draw-command buffer)
//! 2. six depth-only passes, one per cube face, draw the batch
//!
//! The main view cull runs afterwards and overwrites the instance counts
//! for the camera.

use glam::{Mat4, Vec3};

use crate::errors::Result;
use crate::renderer::core::{
    BarrierFlags, DepthAttachment, GpuDevice, GraphicsState, Invocation, ParamDecl, ProgramDesc,
    ProgramId, RenderContext, RenderPassDesc, TextureDesc, TextureId, UniformKind, VertexInput,
};
use crate::renderer::scene_batch::{CULL_WORKGROUP, DRAW_COMMAND_SLOT, MESH_SLOT, SceneBatch};
use crate::scene::light::ShadowSettings;
use crate::scene::model::{DrawCommand, Mesh};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const CULL_PARAMS: &[ParamDecl] = &[
    ParamDecl::new("light_position", UniformKind::Vec3),
    ParamDecl::new("far", UniformKind::F32),
    ParamDecl::new("mesh_count", UniformKind::U32),
];

const RENDER_PARAMS: &[ParamDecl] = &[
    ParamDecl::new("face_view_projection", UniformKind::Mat4),
    ParamDecl::new("light_position", UniformKind::Vec3),
    ParamDecl::new("near", UniformKind::F32),
    ParamDecl::new("far", UniformKind::F32),
];

const DEPTH_ONLY: GraphicsState = GraphicsState {
    color_formats: &[],
    depth_format: Some(DEPTH_FORMAT),
    depth_write: true,
    depth_compare: wgpu::CompareFunction::Less,
    alpha_blend: false,
    topology: wgpu::PrimitiveTopology::TriangleList,
    vertex_input: VertexInput::SceneVertex,
};

/// Look direction and up vector of each cube face (+X, -X, +Y, -Y, +Z, -Z).
const FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

pub struct PointShadow {
    light_index: usize,
    position: Vec3,
    settings: ShadowSettings,

    depth_map: TextureId,
    cull_program: ProgramId,
    render_program: ProgramId,
}

impl PointShadow {
    pub fn new(
        device: &mut dyn GpuDevice,
        light_index: usize,
        position: Vec3,
        settings: ShadowSettings,
    ) -> Result<Self> {
        let depth_map = device.create_texture(&TextureDesc::cube(
            "point_shadow_map",
            settings.resolution,
            DEPTH_FORMAT,
        ))?;
        let cull_program = device.create_program(
            &ProgramDesc::compute("shadow_cull", [CULL_WORKGROUP, 1])
                .with_params(CULL_PARAMS)
                .with_reference(range_cull_kernel),
        )?;
        let render_program = device.create_program(
            &ProgramDesc::graphics("shadow_depth", DEPTH_ONLY).with_params(RENDER_PARAMS),
        )?;

        let mut shadow = Self {
            light_index,
            position,
            settings,
            depth_map,
            cull_program,
            render_program,
        };
        shadow.upload(device);
        Ok(shadow)
    }

    fn upload(&self, device: &mut dyn GpuDevice) {
        let s = &self.settings;
        device.set_uniform(self.cull_program, "light_position", self.position.into());
        device.set_uniform(self.cull_program, "far", s.far.into());
        device.set_uniform(self.render_program, "light_position", self.position.into());
        device.set_uniform(self.render_program, "near", s.near.into());
        device.set_uniform(self.render_program, "far", s.far.into());
    }

    #[must_use]
    pub fn light_index(&self) -> usize {
        self.light_index
    }

    #[must_use]
    pub fn depth_map(&self) -> TextureId {
        self.depth_map
    }

    #[must_use]
    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, device: &mut dyn GpuDevice, position: Vec3) {
        self.position = position;
        self.upload(device);
    }

    /// View-projection of each cube face.
    #[must_use]
    pub fn face_matrices(&self) -> [Mat4; 6] {
        let projection = Mat4::perspective_rh(
            std::f32::consts::FRAC_PI_2,
            1.0,
            self.settings.near,
            self.settings.far,
        );
        FACES.map(|(dir, up)| projection * Mat4::look_to_rh(self.position, dir, up))
    }

    /// Culls the batch against the light range and renders all six faces.
    pub fn render(&self, ctx: &mut RenderContext<'_>, batch: &SceneBatch) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len() as u32;

        ctx.use_program(self.cull_program);
        ctx.device()
            .set_uniform(self.cull_program, "mesh_count", count.into());
        ctx.reset_bindings();
        ctx.bind_storage_buffer(DRAW_COMMAND_SLOT, batch.draw_command_buffer(), true);
        ctx.bind_storage_buffer(MESH_SLOT, batch.mesh_buffer(), false);
        ctx.dispatch(count.div_ceil(CULL_WORKGROUP), 1, 1);
        ctx.memory_barrier(BarrierFlags::COMMAND | BarrierFlags::SHADER_STORAGE);

        ctx.reset_bindings();
        for (face, view_projection) in self.face_matrices().into_iter().enumerate() {
            ctx.device().set_uniform(
                self.render_program,
                "face_view_projection",
                view_projection.into(),
            );
            ctx.begin_render_pass(&RenderPassDesc::new("point_shadow_face").with_depth(
                DepthAttachment {
                    texture: self.depth_map,
                    clear: Some(1.0),
                    read_only: false,
                    layer: Some(face as u32),
                },
            ));
            ctx.use_program(self.render_program);
            batch.draw(ctx);
            ctx.end_render_pass();
        }
    }
}

/// Keeps meshes whose world bounds reach into the light's range sphere.
fn range_cull_kernel(inv: &mut Invocation<'_>) {
    let light = inv.vec3("light_position");
    let range = inv.f32("far");
    let mesh_count = inv.u32("mesh_count") as usize;
    let meshes: Vec<Mesh> = inv.read_buffer(MESH_SLOT);
    let mut commands: Vec<DrawCommand> = inv.read_buffer(DRAW_COMMAND_SLOT);

    let invocations = inv.extent()[0] as usize;
    for i in 0..mesh_count.min(invocations) {
        let (lo, hi) = meshes[i].world_aabb();
        let closest = light.clamp(lo, hi);
        commands[i].instance_count = u32::from(closest.distance_squared(light) <= range * range);
    }

    inv.write_buffer(DRAW_COMMAND_SLOT, &commands);
}
