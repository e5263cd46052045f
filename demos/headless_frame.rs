//! Headless Frame Example
//!
//! Drives the full frame loop on the CPU reference device: a few rasterized
//! frames, a switch to progressive path tracing, a camera move that restarts
//! accumulation, and a resize. Logs the command schedule of one frame of
//! each mode and the average brightness of the presented image.
//!
//! ```text
//! RUST_LOG=debug cargo run --example headless_frame [settings.json]
//! ```

use glam::{Vec2, Vec3, Vec4Swizzles};
use log::info;

use lumen::renderer::core::Command;
use lumen::renderer::{AtmosphereSettings, ParticleSettings};
use lumen::scene::default_lights;
use lumen::{
    CameraInput, FlyCamera, FrameOrchestrator, HeadlessDevice, Material, Model, RenderMode,
    RendererSettings, ShadowSettings, Vertex,
};

const DT: f32 = 1.0 / 30.0;

/// Axis-aligned box with per-face normals.
fn cuboid(center: Vec3, half: Vec3, material: Material) -> Model {
    const FACES: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in FACES {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = center + (normal + u * su + v * sv) * half;
            vertices.push(Vertex::new(
                position,
                Vec2::new(su * 0.5 + 0.5, sv * 0.5 + 0.5),
                normal,
            ));
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    let mut model = Model::new();
    model.push_mesh(&vertices, &indices, material);
    model
}

fn scene() -> Vec<Model> {
    let floor = Material {
        roughness: 0.9,
        ..Material::default()
    };
    let red = Material {
        base_color: glam::Vec4::new(0.8, 0.2, 0.2, 1.0),
        ..Material::default()
    };
    let lamp = Material {
        emissive: Vec3::new(4.0, 3.5, 2.5),
        ..Material::default()
    };
    vec![
        cuboid(Vec3::new(0.0, -0.5, 0.0), Vec3::new(10.0, 0.5, 10.0), floor),
        cuboid(Vec3::new(-1.5, 1.0, 0.0), Vec3::splat(1.0), red),
        cuboid(Vec3::new(2.0, 0.5, -1.0), Vec3::splat(0.5), lamp),
    ]
}

fn schedule(commands: &[Command]) -> String {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::Dispatch { program, .. } => Some(*program),
            Command::BeginRenderPass(label) => Some(*label),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" → ")
}

fn mean_brightness(frames: &FrameOrchestrator<HeadlessDevice>) -> f32 {
    let (width, height) = frames.viewport();
    let image = frames.device().texture_image(frames.final_output());
    let mut sum = 0.0;
    for y in 0..height {
        for x in 0..width {
            sum += image.load(x, y, 0).xyz().dot(Vec3::splat(1.0 / 3.0));
        }
    }
    sum / (width * height) as f32
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut settings = match std::env::args().nth(1) {
        Some(path) => RendererSettings::load(path)?,
        None => RendererSettings::default(),
    };
    // Keep the CPU reference passes quick
    settings.atmosphere = AtmosphereSettings {
        resolution: 16,
        ..settings.atmosphere
    };
    settings.particles = ParticleSettings {
        count: 256,
        ..settings.particles
    };

    let mut frames =
        FrameOrchestrator::new(HeadlessDevice::new().with_log_limit(4096), settings, 64, 36)?;
    frames.add_models(scene())?;
    frames.add_lights(default_lights().into_iter().map(|mut light| {
        if let Some(shadow) = light.shadow.as_mut() {
            *shadow = ShadowSettings {
                resolution: 32,
                ..*shadow
            };
        }
        light
    }))?;

    let mut camera = FlyCamera::new(Vec3::new(0.0, 2.0, 8.0), Vec3::Y, -90.0, -10.0, 0.1, 4.0);

    frames.set_mode(RenderMode::Rasterized);
    for _ in 0..3 {
        frames.device_mut().take_commands();
        frames.on_update(DT, &mut camera);
        frames.on_render(DT);
    }
    info!("Rasterized frame: {}", schedule(frames.device().commands()));
    info!("Rasterized brightness: {:.4}", mean_brightness(&frames));

    frames.toggle_mode();
    for _ in 0..8 {
        frames.device_mut().take_commands();
        frames.on_update(DT, &mut camera);
        frames.on_render(DT);
    }
    info!("Path traced frame: {}", schedule(frames.device().commands()));
    info!(
        "Path traced brightness after {} samples: {:.4}",
        frames.accumulation_count(),
        mean_brightness(&frames)
    );

    camera.input(CameraInput {
        movement: Vec3::X,
        ..CameraInput::default()
    });
    frames.on_update(DT, &mut camera);
    info!("Camera moved, accumulation at {}", frames.accumulation_count());

    frames.on_resize(48, 48)?;
    frames.on_render(DT);
    info!(
        "Resized to {:?}; {} frames presented, {} hazards",
        frames.viewport(),
        frames.device().frames_presented(),
        frames.device().hazards().len()
    );

    Ok(())
}
