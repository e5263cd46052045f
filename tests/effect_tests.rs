//! Effect Tests
//!
//! Tests for:
//! - Push-on-write parameters and output barriers of compute effects
//! - Volumetric ray marching
//! - Progressive accumulation of the path tracer
//! - SSAO kernel generation
//! - Composite, particles, point shadows and the atmosphere cube
//! - Resizing effect outputs

use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use lumen::renderer::core::{
    BarrierFlags, BufferDesc, BufferId, Command, RenderContext, TextureDesc, TextureId,
    UniformValue,
};
use lumen::renderer::passes::atmosphere::face_direction;
use lumen::renderer::passes::particles::GpuParticle;
use lumen::renderer::passes::ssao::generate_ssao_kernel;
use lumen::renderer::passes::{
    AtmosphereEnvironment, CompositePass, ParticleSystem, PathTracer, PointShadow, SsaoPass,
    VolumetricLighting,
};
use lumen::renderer::{
    AtmosphereSettings, ParticleSettings, PathTracerSettings, SsaoSettings, VolumetricSettings,
};
use lumen::{
    DrawCommand, Effect, FrameState, GpuDevice, HeadlessDevice, Material, Model, SceneBatch,
    ShadowSettings, Vertex,
};

// ============================================================================
// Helpers
// ============================================================================

fn frame_buffer(device: &mut HeadlessDevice, state: &FrameState) -> BufferId {
    let buffer = device
        .create_buffer(
            &BufferDesc::new("frame_state", wgpu::BufferUsages::UNIFORM)
                .with_size(size_of::<FrameState>() as u64),
        )
        .unwrap();
    device.write_buffer(buffer, 0, bytemuck::bytes_of(state));
    buffer
}

/// Camera at +5 on z looking at the origin, 60° vertical field of view.
fn camera_state() -> FrameState {
    let mut state = FrameState::default();
    state.set_projection(
        Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0),
        0.1,
        100.0,
    );
    let eye = Vec3::new(0.0, 0.0, 5.0);
    state.set_view(Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y), eye);
    state
}

fn texture(
    device: &mut HeadlessDevice,
    label: &'static str,
    size: (u32, u32),
    format: wgpu::TextureFormat,
    value: Vec4,
) -> TextureId {
    let texture = device
        .create_texture(&TextureDesc::d2(label, size.0, size.1, format))
        .unwrap();
    device.clear_texture(texture, value);
    texture
}

fn quad(center: Vec3, half: f32, material: Material) -> Model {
    let corners = [
        Vec2::new(-1.0, -1.0),
        Vec2::new(1.0, -1.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(-1.0, 1.0),
    ];
    let vertices: Vec<Vertex> = corners
        .iter()
        .map(|&c| Vertex::new(center + (c * half).extend(0.0), Vec2::ZERO, Vec3::Z))
        .collect();
    let mut model = Model::new();
    model.push_mesh(&vertices, &[0, 1, 2, 0, 2, 3], material);
    model
}

/// The dispatch recorded in `commands` and the command right after it.
fn dispatch_and_next(commands: &[Command]) -> (&Command, Option<&Command>) {
    let i = commands
        .iter()
        .position(|c| matches!(c, Command::Dispatch { .. }))
        .expect("no dispatch recorded");
    (&commands[i], commands.get(i + 1))
}

fn assert_close(actual: Vec3, expected: Vec3) {
    assert!(
        actual.abs_diff_eq(expected, 1e-4),
        "expected {expected}, got {actual}"
    );
}

fn volumetric_settings() -> VolumetricSettings {
    VolumetricSettings {
        samples: 8,
        scattering: 0.2,
        max_dist: 20.0,
        absorbance: [0.02, 0.03, 0.04],
        ..VolumetricSettings::default()
    }
}

// ============================================================================
// Volumetric Lighting
// ============================================================================

#[test]
fn volumetric_parameters_upload_on_write() {
    let mut device = HeadlessDevice::new();
    let mut pass = VolumetricLighting::new(&mut device, 16, 16, &volumetric_settings()).unwrap();
    let program = pass.program();

    assert_eq!(device.uniform(program, "samples"), Some(UniformValue::U32(8)));
    assert_eq!(device.uniform(program, "max_dist"), Some(UniformValue::F32(20.0)));

    pass.set_samples(&mut device, 32);
    pass.set_scattering(&mut device, 0.3);
    pass.set_max_dist(&mut device, 50.0);
    pass.set_absorbance(&mut device, Vec3::new(0.1, 0.2, 0.3));

    assert_eq!(device.uniform(program, "samples"), Some(UniformValue::U32(32)));
    assert_eq!(device.uniform(program, "scattering"), Some(UniformValue::F32(0.3)));
    assert_eq!(device.uniform(program, "max_dist"), Some(UniformValue::F32(50.0)));
    assert_eq!(
        device.uniform(program, "absorbance"),
        Some(UniformValue::Vec3(Vec3::new(0.1, 0.2, 0.3)))
    );
    assert_eq!(pass.samples(), 32);
    assert_eq!(pass.scattering(), 0.3);
}

#[test]
fn volumetric_dispatches_8x4_tiles_then_fetch_barrier() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let depth = texture(&mut device, "depth", (20, 10), wgpu::TextureFormat::Depth32Float, Vec4::ONE);
    let pass = VolumetricLighting::new(&mut device, 20, 10, &volumetric_settings()).unwrap();
    device.take_commands();

    pass.compute(&mut RenderContext::new(&mut device, frame), depth);

    let commands = device.take_commands();
    let (dispatch, next) = dispatch_and_next(&commands);
    assert_eq!(
        *dispatch,
        Command::Dispatch {
            program: "volumetric_lighting",
            groups: [3, 3, 1],
        }
    );
    assert_eq!(next, Some(&Command::Barrier(BarrierFlags::TEXTURE_FETCH)));
}

#[test]
fn volumetric_scattering_grows_with_distance() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let depth = texture(&mut device, "depth", (8, 8), wgpu::TextureFormat::Depth32Float, Vec4::ONE);
    let mut pass = VolumetricLighting::new(&mut device, 8, 8, &volumetric_settings()).unwrap();

    pass.set_max_dist(&mut device, 5.0);
    pass.compute(&mut RenderContext::new(&mut device, frame), depth);
    let near = device.texture_image(pass.result()).load(4, 4, 0).xyz();

    pass.set_max_dist(&mut device, 20.0);
    pass.compute(&mut RenderContext::new(&mut device, frame), depth);
    let image = device.texture_image(pass.result());
    let far = image.load(4, 4, 0).xyz();

    assert!(near.is_finite() && near.cmpgt(Vec3::ZERO).all(), "{near}");
    assert!(far.cmpgt(near).all(), "{far} should exceed {near}");
    for y in 0..8 {
        for x in 0..8 {
            assert!(image.load(x, y, 0).xyz().is_finite());
        }
    }
}

#[test]
fn volumetric_without_absorbance_is_black() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let depth = texture(&mut device, "depth", (8, 8), wgpu::TextureFormat::Depth32Float, Vec4::ONE);
    let mut pass = VolumetricLighting::new(&mut device, 8, 8, &volumetric_settings()).unwrap();

    pass.set_absorbance(&mut device, Vec3::ZERO);
    pass.compute(&mut RenderContext::new(&mut device, frame), depth);

    assert_eq!(device.texture_image(pass.result()).load(3, 5, 0).xyz(), Vec3::ZERO);
}

#[test]
fn volumetric_resize_keeps_format() {
    let mut device = HeadlessDevice::new();
    let mut pass = VolumetricLighting::new(&mut device, 16, 16, &volumetric_settings()).unwrap();

    pass.set_size(&mut device, 7, 5).unwrap();

    let desc = device.texture_desc(pass.result());
    assert_eq!(desc.size(), (7, 5));
    assert_eq!(desc.format, wgpu::TextureFormat::Rgba16Float);
    assert_eq!(pass.outputs().as_slice(), &[pass.result()]);
    assert_eq!(pass.name(), "volumetric_lighting");
}

// ============================================================================
// Path Tracer
// ============================================================================

fn tracer_settings() -> PathTracerSettings {
    PathTracerSettings {
        ray_depth: 2,
        aperture_diameter: 0.0,
        ..PathTracerSettings::default()
    }
}

fn environment(device: &mut HeadlessDevice) -> TextureId {
    device
        .create_texture(&TextureDesc::cube("env", 4, wgpu::TextureFormat::Rgba16Float))
        .unwrap()
}

fn set_frame_count(device: &mut HeadlessDevice, frame: BufferId, count: u32) {
    let state = FrameState {
        frame_count: count,
        ..camera_state()
    };
    device.write_buffer(frame, 0, bytemuck::bytes_of(&state));
}

#[test]
fn path_tracer_first_sample_overwrites() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let batch = SceneBatch::new(&mut device).unwrap();
    let env = environment(&mut device);
    let mut tracer = PathTracer::new(&mut device, 8, 8, &tracer_settings()).unwrap();

    // Stale contents from an earlier accumulation
    device.clear_texture(tracer.result(), Vec4::splat(9.0));
    device.clear_texture(env, Vec4::new(0.2, 0.4, 0.6, 1.0));
    set_frame_count(&mut device, frame, 0);
    tracer.compute(&mut RenderContext::new(&mut device, frame), &batch, env);

    let image = device.texture_image(tracer.result());
    for (x, y) in [(0, 0), (3, 4), (7, 7)] {
        assert_close(image.load(x, y, 0).xyz(), Vec3::new(0.2, 0.4, 0.6));
    }
}

#[test]
fn path_tracer_blends_running_mean() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let batch = SceneBatch::new(&mut device).unwrap();
    let env = environment(&mut device);
    let mut tracer = PathTracer::new(&mut device, 8, 8, &tracer_settings()).unwrap();

    device.clear_texture(env, Vec4::new(0.2, 0.4, 0.6, 1.0));
    set_frame_count(&mut device, frame, 0);
    tracer.compute(&mut RenderContext::new(&mut device, frame), &batch, env);

    // n = 1: halfway towards the new sample
    device.clear_texture(env, Vec4::new(1.0, 0.0, 0.0, 1.0));
    set_frame_count(&mut device, frame, 1);
    tracer.compute(&mut RenderContext::new(&mut device, frame), &batch, env);
    assert_close(
        device.texture_image(tracer.result()).load(2, 2, 0).xyz(),
        Vec3::new(0.6, 0.2, 0.3),
    );

    // n = 2: a third of the way
    device.clear_texture(env, Vec4::new(0.0, 0.8, 0.0, 1.0));
    set_frame_count(&mut device, frame, 2);
    tracer.compute(&mut RenderContext::new(&mut device, frame), &batch, env);
    assert_close(
        device.texture_image(tracer.result()).load(2, 2, 0).xyz(),
        Vec3::new(0.4, 0.4, 0.2),
    );
    assert!(device.hazards().is_empty());
}

#[test]
fn path_tracer_sees_emissive_surface() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let emitter = Material {
        base_color: Vec4::ZERO,
        emissive: Vec3::new(1.0, 0.5, 0.25),
        ..Material::default()
    };
    let mut batch = SceneBatch::new(&mut device).unwrap();
    batch
        .add(&mut device, vec![quad(Vec3::ZERO, 50.0, emitter)])
        .unwrap();
    let env = environment(&mut device);
    let mut tracer = PathTracer::new(&mut device, 8, 8, &tracer_settings()).unwrap();

    tracer.compute(&mut RenderContext::new(&mut device, frame), &batch, env);

    let image = device.texture_image(tracer.result());
    assert_close(image.load(4, 4, 0).xyz(), Vec3::new(1.0, 0.5, 0.25));
}

#[test]
fn path_tracer_dispatch_and_barrier() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let batch = SceneBatch::new(&mut device).unwrap();
    let env = environment(&mut device);
    let mut tracer = PathTracer::new(&mut device, 17, 9, &tracer_settings()).unwrap();
    device.take_commands();

    tracer.compute(&mut RenderContext::new(&mut device, frame), &batch, env);

    let commands = device.take_commands();
    let (dispatch, next) = dispatch_and_next(&commands);
    assert_eq!(
        *dispatch,
        Command::Dispatch {
            program: "path_tracer",
            groups: [3, 2, 1],
        }
    );
    assert_eq!(
        next,
        Some(&Command::Barrier(
            BarrierFlags::TEXTURE_FETCH | BarrierFlags::SHADER_IMAGE_ACCESS
        ))
    );
    assert_eq!(
        device.texture_desc(tracer.result()).format,
        wgpu::TextureFormat::Rgba32Float
    );
}

#[test]
fn path_tracer_settings_round_trip() {
    let mut device = HeadlessDevice::new();
    let mut tracer = PathTracer::new(&mut device, 8, 8, &tracer_settings()).unwrap();

    let next = PathTracerSettings {
        ray_depth: 6,
        focal_length: 3.0,
        aperture_diameter: 0.1,
    };
    tracer.apply_settings(&mut device, &next);

    assert_eq!(tracer.settings(), next);
    assert_eq!(
        device.uniform(tracer.program(), "ray_depth"),
        Some(UniformValue::U32(6))
    );
}

// ============================================================================
// SSAO
// ============================================================================

#[test]
fn ssao_kernel_is_deterministic_hemisphere() {
    let kernel = generate_ssao_kernel(16);

    assert_eq!(kernel.len(), 16);
    assert_eq!(kernel, generate_ssao_kernel(16));
    for sample in &kernel {
        assert!(sample.z >= 0.0, "{sample} below the surface");
        assert!(sample.xyz().length() <= 1.0 + 1e-5);
        assert_eq!(sample.w, 0.0);
    }
}

#[test]
fn ssao_set_samples_reuploads_kernel() {
    let mut device = HeadlessDevice::new();
    let mut pass = SsaoPass::new(&mut device, 8, 8, &SsaoSettings::default()).unwrap();
    device.take_commands();

    pass.set_samples(&mut device, 8).unwrap();

    assert!(device.take_commands().contains(&Command::AllocateBuffer {
        label: "ssao_kernel",
        size: 8 * size_of::<Vec4>() as u64,
    }));
    assert_eq!(device.uniform(pass.program(), "samples"), Some(UniformValue::U32(8)));
    assert_eq!(pass.samples(), 8);
}

#[test]
fn ssao_without_normals_is_unoccluded() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &camera_state());
    let depth = texture(&mut device, "depth", (8, 8), wgpu::TextureFormat::Depth32Float, Vec4::ONE);
    let normals = texture(&mut device, "normals", (8, 8), wgpu::TextureFormat::Rgba16Float, Vec4::ZERO);
    let pass = SsaoPass::new(&mut device, 8, 8, &SsaoSettings::default()).unwrap();
    device.take_commands();

    pass.compute(&mut RenderContext::new(&mut device, frame), depth, normals);

    assert_eq!(device.texture_image(pass.result()).load(5, 2, 0).x, 1.0);
    let commands = device.take_commands();
    let (_, next) = dispatch_and_next(&commands);
    assert_eq!(next, Some(&Command::Barrier(BarrierFlags::TEXTURE_FETCH)));
}

#[test]
fn ssao_resize_keeps_single_channel_format() {
    let mut device = HeadlessDevice::new();
    let mut pass = SsaoPass::new(&mut device, 8, 8, &SsaoSettings::default()).unwrap();

    pass.set_size(&mut device, 31, 3).unwrap();

    let desc = device.texture_desc(pass.result());
    assert_eq!(desc.size(), (31, 3));
    assert_eq!(desc.format, wgpu::TextureFormat::R32Float);
}

// ============================================================================
// Composite
// ============================================================================

#[test]
fn composite_adds_optional_terms_and_clamps() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &FrameState::default());
    let format = wgpu::TextureFormat::Rgba16Float;
    let color = texture(&mut device, "color", (8, 8), format, Vec4::new(0.25, 0.5, 0.75, 1.0));
    let fog = texture(&mut device, "fog", (8, 8), format, Vec4::new(0.25, 0.25, 0.5, 1.0));
    let pass = CompositePass::new(&mut device, 8, 8).unwrap();

    pass.compute(&mut RenderContext::new(&mut device, frame), color, None, None);
    assert_close(
        device.texture_image(pass.result()).load(1, 1, 0).xyz(),
        Vec3::new(0.25, 0.5, 0.75),
    );

    pass.compute(&mut RenderContext::new(&mut device, frame), color, Some(fog), None);
    assert_close(
        device.texture_image(pass.result()).load(1, 1, 0).xyz(),
        Vec3::new(0.5, 0.75, 1.0),
    );

    pass.compute(&mut RenderContext::new(&mut device, frame), color, Some(fog), Some(fog));
    assert_close(
        device.texture_image(pass.result()).load(6, 6, 0).xyz(),
        Vec3::new(0.75, 1.0, 1.0),
    );
}

// ============================================================================
// Particles
// ============================================================================

fn particle_settings(count: u32, seed: u64) -> ParticleSettings {
    ParticleSettings {
        count,
        spawn_extent: 10.0,
        seed,
    }
}

#[test]
fn particles_fall_towards_the_attractor() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &FrameState::default());
    let system = ParticleSystem::new(&mut device, &particle_settings(100, 7)).unwrap();
    let before: Vec<GpuParticle> = device.read_buffer(system.buffer());

    system.update(&mut RenderContext::new(&mut device, frame), 0.1);

    let after: Vec<GpuParticle> = device.read_buffer(system.buffer());
    assert_eq!(after.len(), 100);
    for (b, a) in before.iter().zip(&after) {
        if b.position != Vec3::ZERO {
            assert!(a.position.length() < b.position.length());
        }
    }
    let commands = device.take_commands();
    let (dispatch, next) = dispatch_and_next(&commands);
    assert_eq!(
        *dispatch,
        Command::Dispatch {
            program: "particle_update",
            groups: [2, 1, 1],
        }
    );
    assert_eq!(next, Some(&Command::Barrier(BarrierFlags::SHADER_STORAGE)));
}

#[test]
fn particle_spawn_depends_only_on_seed() {
    let mut device = HeadlessDevice::new();
    let a = ParticleSystem::new(&mut device, &particle_settings(16, 3)).unwrap();
    let b = ParticleSystem::new(&mut device, &particle_settings(16, 3)).unwrap();
    let c = ParticleSystem::new(&mut device, &particle_settings(16, 4)).unwrap();

    let read = |system: &ParticleSystem| device.read_buffer::<GpuParticle>(system.buffer());
    assert_eq!(read(&a), read(&b));
    assert_ne!(read(&a), read(&c));
    assert!(read(&a).iter().all(|p| p.position.abs().max_element() <= 10.0));
}

#[test]
fn empty_particle_system_records_nothing() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &FrameState::default());
    let color = texture(&mut device, "color", (4, 4), wgpu::TextureFormat::Rgba16Float, Vec4::ZERO);
    let depth = texture(&mut device, "depth", (4, 4), wgpu::TextureFormat::Depth32Float, Vec4::ONE);
    let system = ParticleSystem::new(&mut device, &particle_settings(0, 1)).unwrap();
    device.take_commands();

    let mut ctx = RenderContext::new(&mut device, frame);
    system.update(&mut ctx, 0.1);
    system.render(&mut ctx, color, depth);
    drop(ctx);

    assert_eq!(system.count(), 0);
    assert!(device.commands().is_empty());
}

// ============================================================================
// Point Shadows
// ============================================================================

fn shadow_settings() -> ShadowSettings {
    ShadowSettings {
        resolution: 8,
        near: 0.1,
        far: 10.0,
    }
}

#[test]
fn shadow_faces_look_along_each_axis() {
    let mut device = HeadlessDevice::new();
    let position = Vec3::new(1.0, 2.0, 3.0);
    let shadow = PointShadow::new(&mut device, 0, position, shadow_settings()).unwrap();

    let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
    for (face, (matrix, axis)) in shadow.face_matrices().iter().zip(axes).enumerate() {
        let clip = *matrix * (position + axis * 5.0).extend(1.0);
        let ndc = clip.xyz() / clip.w;
        assert!(clip.w > 0.0, "face {face} looks away from {axis}");
        assert!(ndc.truncate().length() < 1e-4, "face {face}: {ndc}");
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}

#[test]
fn shadow_cull_keeps_meshes_in_light_range() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &FrameState::default());
    let mut batch = SceneBatch::new(&mut device).unwrap();
    batch
        .add(
            &mut device,
            vec![
                quad(Vec3::new(0.0, 0.0, -2.0), 1.0, Material::default()),
                quad(Vec3::new(0.0, 0.0, -40.0), 1.0, Material::default()),
            ],
        )
        .unwrap();
    let shadow = PointShadow::new(&mut device, 0, Vec3::ZERO, shadow_settings()).unwrap();
    device.take_commands();

    shadow.render(&mut RenderContext::new(&mut device, frame), &batch);

    let commands: Vec<DrawCommand> = device.read_buffer(batch.draw_command_buffer());
    assert_eq!(commands[0].instance_count, 1);
    assert_eq!(commands[1].instance_count, 0);

    let log = device.take_commands();
    let faces = log
        .iter()
        .filter(|c| **c == Command::BeginRenderPass("point_shadow_face"))
        .count();
    assert_eq!(faces, 6);
    assert!(device.hazards().is_empty());
}

// ============================================================================
// Atmosphere
// ============================================================================

#[test]
fn face_directions_match_cube_layout() {
    let center = Vec2::splat(0.5);
    let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
    for (face, axis) in axes.into_iter().enumerate() {
        assert_close(face_direction(face as u32, center), axis);
    }
    let corner = face_direction(4, Vec2::ZERO);
    assert!((corner.length() - 1.0).abs() < 1e-5);
    assert!(corner.z > 0.0 && corner.x < 0.0 && corner.y > 0.0);
}

#[test]
fn atmosphere_computes_all_faces_in_one_dispatch() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device, &FrameState::default());
    let settings = AtmosphereSettings {
        resolution: 8,
        inscattering_samples: 4,
        density_samples: 2,
        ..AtmosphereSettings::default()
    };
    let mut sky = AtmosphereEnvironment::new(&mut device, &settings).unwrap();
    assert!(sky.is_dirty());
    device.take_commands();

    sky.compute(&mut RenderContext::new(&mut device, frame));

    assert!(!sky.is_dirty());
    let commands = device.take_commands();
    let (dispatch, next) = dispatch_and_next(&commands);
    assert_eq!(
        *dispatch,
        Command::Dispatch {
            program: "atmosphere",
            groups: [1, 1, 6],
        }
    );
    assert_eq!(next, Some(&Command::Barrier(BarrierFlags::TEXTURE_FETCH)));

    let cube = device.texture_image(sky.result());
    let horizon = cube.sample_cube(Vec3::new(1.0, 0.1, 0.0).normalize()).xyz();
    assert!(horizon.is_finite() && horizon.max_element() > 0.0, "{horizon}");
    assert!(cube.sample_cube(Vec3::NEG_Y).xyz().is_finite());
}

#[test]
fn atmosphere_resolution_change_reallocates_cube() {
    let mut device = HeadlessDevice::new();
    let settings = AtmosphereSettings {
        resolution: 8,
        ..AtmosphereSettings::default()
    };
    let mut sky = AtmosphereEnvironment::new(&mut device, &settings).unwrap();

    let next = AtmosphereSettings {
        resolution: 4,
        ..settings
    };
    sky.set_settings(&mut device, &next).unwrap();

    let desc = device.texture_desc(sky.result());
    assert_eq!(desc.size(), (4, 4));
    assert_eq!(desc.layers(), 6);
    assert!(sky.is_dirty());
}
