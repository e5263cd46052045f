//! GPU Particles
//!
//! A fixed pool of particles lives in one storage buffer. Each frame a
//! compute pass integrates them around a central attractor, then a point
//! draw blends them over the forward color target, depth-tested against the
//! forward depth without writing it.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use log::debug;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::errors::Result;
use crate::renderer::core::{
    BarrierFlags, BufferDesc, BufferId, DepthAttachment, GpuDevice, GraphicsState, Invocation,
    ParamDecl, ProgramDesc, ProgramId, RenderContext, RenderPassDesc, TextureId, UniformKind,
    VertexInput,
};
use crate::renderer::passes::forward;
use crate::renderer::settings::ParticleSettings;

const PARTICLE_SLOT: u32 = 1;

pub const WORKGROUP: u32 = 64;

/// Pull strength of the attractor at the origin.
const ATTRACTION: f32 = 0.5;
/// Fraction of velocity kept per second.
const DAMPING: f32 = 0.98;

const UPDATE_PARAMS: &[ParamDecl] = &[
    ParamDecl::new("dt", UniformKind::F32),
    ParamDecl::new("particle_count", UniformKind::U32),
];

const POINTS: GraphicsState = GraphicsState {
    color_formats: &[forward::COLOR_FORMAT],
    depth_format: Some(forward::DEPTH_FORMAT),
    depth_write: false,
    depth_compare: wgpu::CompareFunction::Less,
    alpha_blend: true,
    topology: wgpu::PrimitiveTopology::PointList,
    vertex_input: VertexInput::None,
};

/// std430 layout of one particle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    pub position: Vec3,
    pub _pad0: f32,
    pub velocity: Vec3,
    pub _pad1: f32,
}

pub struct ParticleSystem {
    update_program: ProgramId,
    render_program: ProgramId,
    buffer: BufferId,
    count: u32,
}

impl ParticleSystem {
    pub fn new(device: &mut dyn GpuDevice, settings: &ParticleSettings) -> Result<Self> {
        let update_program = device.create_program(
            &ProgramDesc::compute("particle_update", [WORKGROUP, 1])
                .with_params(UPDATE_PARAMS)
                .with_reference(integrate_kernel),
        )?;
        let render_program = device.create_program(&ProgramDesc::graphics("particle_render", POINTS))?;
        let buffer = device.create_buffer(&BufferDesc::new(
            "particles",
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX,
        ))?;

        let particles = spawn(settings);
        device.allocate_buffer(buffer, bytemuck::cast_slice(&particles))?;
        let count = particles.len() as u32;
        device.set_uniform(update_program, "particle_count", count.into());
        debug!("Particles: spawned {count} (seed {})", settings.seed);

        Ok(Self {
            update_program,
            render_program,
            buffer,
            count,
        })
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Advances the simulation by `dt` seconds.
    pub fn update(&self, ctx: &mut RenderContext<'_>, dt: f32) {
        if self.count == 0 {
            return;
        }
        ctx.use_program(self.update_program);
        ctx.device().set_uniform(self.update_program, "dt", dt.into());
        ctx.reset_bindings();
        ctx.bind_storage_buffer(PARTICLE_SLOT, self.buffer, true);
        ctx.dispatch(self.count.div_ceil(WORKGROUP), 1, 1);
        ctx.memory_barrier(BarrierFlags::SHADER_STORAGE);
    }

    /// Blends the particles over `color`, tested against `depth`.
    pub fn render(&self, ctx: &mut RenderContext<'_>, color: TextureId, depth: TextureId) {
        if self.count == 0 {
            return;
        }
        ctx.begin_render_pass(&RenderPassDesc::new("particles").with_color(color, None).with_depth(
            DepthAttachment {
                texture: depth,
                clear: None,
                read_only: true,
                layer: None,
            },
        ));
        ctx.use_program(self.render_program);
        ctx.reset_bindings();
        ctx.bind_storage_buffer(PARTICLE_SLOT, self.buffer, false);
        ctx.draw_arrays(self.count, 1);
        ctx.end_render_pass();
    }
}

fn spawn(settings: &ParticleSettings) -> Vec<GpuParticle> {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let extent = settings.spawn_extent.abs();
    let coord = |rng: &mut StdRng| {
        if extent > 0.0 {
            rng.random_range(-extent..=extent)
        } else {
            0.0
        }
    };
    (0..settings.count)
        .map(|_| GpuParticle {
            position: Vec3::new(coord(&mut rng), coord(&mut rng), coord(&mut rng)),
            _pad0: 0.0,
            velocity: Vec3::ZERO,
            _pad1: 0.0,
        })
        .collect()
}

fn integrate_kernel(inv: &mut Invocation<'_>) {
    let dt = inv.f32("dt");
    let count = inv.u32("particle_count") as usize;
    let mut particles: Vec<GpuParticle> = inv.read_buffer(PARTICLE_SLOT);

    let invocations = inv.extent()[0] as usize;
    let damping = DAMPING.powf(dt);
    for p in particles.iter_mut().take(count.min(invocations)) {
        p.velocity = (p.velocity - p.position * (ATTRACTION * dt)) * damping;
        p.position += p.velocity * dt;
    }

    inv.write_buffer(PARTICLE_SLOT, &particles);
}
