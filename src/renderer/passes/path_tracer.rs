//! Progressive Path Tracer
//!
//! Each frame traces one new sample per pixel and folds it into an
//! accumulation image using the frame state's `frame_count` as the
//! accumulation counter `n`:
//!
//! ```text
//! n == 0 : result = sample                       (start fresh)
//! n  > 0 : result = mix(result, sample, 1/(n+1)) (running mean)
//! ```
//!
//! The counter is the only signal the pass uses; the orchestrator resets it
//! whenever the camera, geometry or a path-tracer parameter changes.
//!
//! The pass watches the batch's geometry version so it notices merged
//! geometry. There is no acceleration structure: the reference kernel
//! tests every world-space mesh bound.
//!
//! | Slot | Resource                      | Access             |
//! |------|-------------------------------|--------------------|
//! | 1-5  | scene batch buffers           | storage (read)     |
//! | 6    | accumulation (`Rgba32Float`)  | read-write image   |
//! | 7    | environment cube              | texture fetch      |

use glam::{Vec2, Vec3, Vec4Swizzles};
use log::debug;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use smallvec::{SmallVec, smallvec};

use super::{Effect, covered_texels};
use crate::errors::Result;
use crate::renderer::core::{
    Access, BarrierFlags, GpuDevice, Invocation, ParamDecl, ProgramDesc, ProgramId,
    RenderContext, TextureDesc, TextureId, UniformKind, group_count,
};
use crate::renderer::scene_batch::{MATERIAL_SLOT, MESH_SLOT, SceneBatch};
use crate::renderer::settings::PathTracerSettings;
use crate::scene::model::{Material, Mesh};

const OUTPUT_SLOT: u32 = 6;
const ENVIRONMENT_SLOT: u32 = 7;

pub const TILE: [u32; 2] = [8, 8];
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("ray_depth", UniformKind::U32),
    ParamDecl::new("focal_length", UniformKind::F32),
    ParamDecl::new("aperture_diameter", UniformKind::F32),
];

pub struct PathTracer {
    program: ProgramId,
    result: TextureId,

    ray_depth: u32,
    focal_length: f32,
    aperture_diameter: f32,

    /// Last geometry version traced.
    seen_geometry: Option<u64>,
}

impl PathTracer {
    pub fn new(
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
        settings: &PathTracerSettings,
    ) -> Result<Self> {
        let program = device.create_program(
            &ProgramDesc::compute("path_tracer", TILE)
                .with_params(PARAMS)
                .with_reference(trace_kernel),
        )?;
        let result = device.create_texture(&TextureDesc::d2(
            "path_tracer_result",
            width,
            height,
            OUTPUT_FORMAT,
        ))?;

        let mut pass = Self {
            program,
            result,
            ray_depth: 0,
            focal_length: 0.0,
            aperture_diameter: 0.0,
            seen_geometry: None,
        };
        pass.apply_settings(device, settings);
        Ok(pass)
    }

    /// Uploads every parameter from `settings`.
    pub fn apply_settings(&mut self, device: &mut dyn GpuDevice, settings: &PathTracerSettings) {
        self.set_ray_depth(device, settings.ray_depth);
        self.set_focal_length(device, settings.focal_length);
        self.set_aperture_diameter(device, settings.aperture_diameter);
    }

    #[must_use]
    pub fn settings(&self) -> PathTracerSettings {
        PathTracerSettings {
            ray_depth: self.ray_depth,
            focal_length: self.focal_length,
            aperture_diameter: self.aperture_diameter,
        }
    }

    #[must_use]
    pub fn ray_depth(&self) -> u32 {
        self.ray_depth
    }

    pub fn set_ray_depth(&mut self, device: &mut dyn GpuDevice, ray_depth: u32) {
        self.ray_depth = ray_depth;
        device.set_uniform(self.program, "ray_depth", ray_depth.into());
    }

    #[must_use]
    pub fn focal_length(&self) -> f32 {
        self.focal_length
    }

    pub fn set_focal_length(&mut self, device: &mut dyn GpuDevice, focal_length: f32) {
        self.focal_length = focal_length;
        device.set_uniform(self.program, "focal_length", focal_length.into());
    }

    #[must_use]
    pub fn aperture_diameter(&self) -> f32 {
        self.aperture_diameter
    }

    pub fn set_aperture_diameter(&mut self, device: &mut dyn GpuDevice, aperture_diameter: f32) {
        self.aperture_diameter = aperture_diameter;
        device.set_uniform(self.program, "aperture_diameter", aperture_diameter.into());
    }

    #[must_use]
    pub fn result(&self) -> TextureId {
        self.result
    }

    #[must_use]
    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Geometry version of the batch at the last `compute`.
    #[must_use]
    pub fn seen_geometry(&self) -> Option<u64> {
        self.seen_geometry
    }

    /// Traces one sample per pixel and blends it into the accumulation image.
    pub fn compute(
        &mut self,
        ctx: &mut RenderContext<'_>,
        batch: &SceneBatch,
        environment: TextureId,
    ) {
        let version = batch.geometry_version();
        if self.seen_geometry != Some(version) {
            debug!(
                "Path tracer: geometry changed, now {} meshes",
                batch.len()
            );
            self.seen_geometry = Some(version);
        }

        let (width, height) = ctx.device().texture_desc(self.result).size();

        ctx.use_program(self.program);
        ctx.reset_bindings();
        batch.bind(ctx);
        ctx.bind_image(OUTPUT_SLOT, self.result, Access::ReadWrite);
        ctx.bind_texture(ENVIRONMENT_SLOT, environment);
        ctx.dispatch(group_count(width, TILE[0]), group_count(height, TILE[1]), 1);
        // Composite fetches the result; next frame loads it as an image.
        ctx.memory_barrier(BarrierFlags::TEXTURE_FETCH | BarrierFlags::SHADER_IMAGE_ACCESS);
    }
}

impl Effect for PathTracer {
    fn name(&self) -> &'static str {
        "path_tracer"
    }

    fn outputs(&self) -> SmallVec<[TextureId; 4]> {
        smallvec![self.result]
    }

    fn set_size(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Result<()> {
        device.resize_texture(self.result, width, height)
    }
}

// ─── Reference kernel ─────────────────────────────────────────────────────────

struct Hit {
    t: f32,
    normal: Vec3,
    mesh: usize,
}

/// Slab test against a world-space box, returning the entry point.
fn intersect_box(origin: Vec3, dir: Vec3, lo: Vec3, hi: Vec3) -> Option<(f32, Vec3)> {
    let inv = dir.recip();
    let t0 = (lo - origin) * inv;
    let t1 = (hi - origin) * inv;
    let near = t0.min(t1);
    let far = t0.max(t1);
    let t_near = near.max_element();
    let t_far = far.min_element();
    if t_near > t_far || t_far <= 0.0 || t_near <= 1e-4 {
        return None;
    }
    let normal = if t_near == near.x {
        Vec3::new(-dir.x.signum(), 0.0, 0.0)
    } else if t_near == near.y {
        Vec3::new(0.0, -dir.y.signum(), 0.0)
    } else {
        Vec3::new(0.0, 0.0, -dir.z.signum())
    };
    Some((t_near, normal))
}

fn closest_hit(bounds: &[(Vec3, Vec3)], origin: Vec3, dir: Vec3) -> Option<Hit> {
    bounds
        .iter()
        .enumerate()
        .filter_map(|(mesh, &(lo, hi))| {
            intersect_box(origin, dir, lo, hi).map(|(t, normal)| Hit { t, normal, mesh })
        })
        .min_by(|a, b| a.t.total_cmp(&b.t))
}

fn cosine_hemisphere(rng: &mut StdRng, normal: Vec3) -> Vec3 {
    let r1: f32 = rng.random_range(0.0..1.0);
    let r2: f32 = rng.random_range(0.0..1.0);
    let phi = std::f32::consts::TAU * r1;
    let r = r2.sqrt();
    let tangent = normal.any_orthonormal_vector();
    let bitangent = normal.cross(tangent);
    (tangent * (phi.cos() * r) + bitangent * (phi.sin() * r) + normal * (1.0 - r2).sqrt())
        .normalize()
}

fn pixel_seed(x: u32, y: u32, frame: u32) -> u64 {
    (u64::from(frame) << 40) ^ (u64::from(y) << 20) ^ u64::from(x)
}

fn trace_kernel(inv: &mut Invocation<'_>) {
    let frame = inv.frame_state();
    let n = frame.frame_count;
    let ray_depth = inv.u32("ray_depth");
    let focal_length = inv.f32("focal_length");
    let aperture = inv.f32("aperture_diameter");

    let meshes: Vec<Mesh> = inv.read_buffer(MESH_SLOT);
    let materials: Vec<Material> = inv.read_buffer(MATERIAL_SLOT);
    let bounds: Vec<(Vec3, Vec3)> = meshes.iter().map(Mesh::world_aabb).collect();

    let right = frame.inv_view.x_axis.xyz();
    let up = frame.inv_view.y_axis.xyz();

    let size = inv.image_size(OUTPUT_SLOT);
    for (x, y) in covered_texels(inv.extent(), size) {
        let mut rng = StdRng::seed_from_u64(pixel_seed(x, y, n));

        let jitter = Vec2::new(rng.random_range(0.0..1.0), rng.random_range(0.0..1.0));
        let uv = (Vec2::new(x as f32, y as f32) + jitter) / Vec2::new(size.0 as f32, size.1 as f32);
        let mut origin = frame.camera_pos;
        let mut dir = (frame.unproject(uv, 1.0) - origin).normalize_or_zero();

        if aperture > 0.0 {
            let focal_point = origin + dir * focal_length;
            let angle: f32 = rng.random_range(0.0..std::f32::consts::TAU);
            let radius = rng.random_range(0.0..1.0f32).sqrt() * aperture * 0.5;
            origin += (right * angle.cos() + up * angle.sin()) * radius;
            dir = (focal_point - origin).normalize_or_zero();
        }

        let mut throughput = Vec3::ONE;
        let mut radiance = Vec3::ZERO;
        for _ in 0..ray_depth {
            let Some(hit) = closest_hit(&bounds, origin, dir) else {
                radiance += throughput * inv.sample_cube(ENVIRONMENT_SLOT, dir).xyz();
                break;
            };
            let material = materials
                .get(meshes[hit.mesh].material_index as usize)
                .copied()
                .unwrap_or_default();
            radiance += throughput * material.emissive;
            throughput *= material.base_color.xyz();
            origin += dir * hit.t + hit.normal * 1e-3;
            dir = cosine_hemisphere(&mut rng, hit.normal);
        }

        let value = if n == 0 {
            radiance
        } else {
            let previous = inv.texture(OUTPUT_SLOT).load(x, y, 0).xyz();
            previous.lerp(radiance, 1.0 / (n as f32 + 1.0))
        };
        inv.store(OUTPUT_SLOT, x, y, value.extend(1.0));
    }
}
