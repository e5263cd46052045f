//! Frame Orchestrator
//!
//! [`FrameOrchestrator`] owns the device, the scene batch, every pass and the
//! per-frame [`FrameState`]. The platform loop drives it with:
//!
//! ```text
//! on_update(dt, camera)   camera sample, accumulation invalidation, frame state
//! on_render(dt)           one frame of the current mode, then present
//! on_resize(w, h)         viewport change
//! ```
//!
//! # Modes
//!
//! [`RenderMode::Rasterized`] runs a fixed pass sequence:
//!
//! ```text
//! SSAO? → point shadows → view cull → forward → particles → volumetrics? → SSR? → composite
//! ```
//!
//! SSAO reads the previous frame's depth and normals, so it runs before the
//! forward pass overwrites them.
//!
//! [`RenderMode::PathTraced`] runs the path tracer and a passthrough
//! composite.
//!
//! Modes change only through [`set_mode`](FrameOrchestrator::set_mode) /
//! [`toggle_mode`](FrameOrchestrator::toggle_mode).
//!
//! # Accumulation
//!
//! `FrameState::frame_count` is the accumulation counter. It increments after
//! every rendered frame and drops to 0 when:
//! - a mode transition happens
//! - while path tracing: the camera moves, the batch geometry or mesh
//!   transforms change, a path-tracer or atmosphere parameter changes, or the
//!   viewport is resized

use glam::Mat4;
use log::{debug, error, info};
use smallvec::SmallVec;

use crate::errors::Result;
use crate::renderer::core::{BufferDesc, BufferId, GpuDevice, RenderContext, TextureId};
use crate::renderer::frame::FrameState;
use crate::renderer::passes::forward::MAX_SHADOW_MAPS;
use crate::renderer::passes::{
    AtmosphereEnvironment, CompositePass, Effect, ForwardPass, ParticleSystem, PathTracer,
    PointShadow, SsaoPass, SsrPass, VolumetricLighting,
};
use crate::renderer::scene_batch::SceneBatch;
use crate::renderer::settings::{
    AtmosphereSettings, PathTracerSettings, ProjectionSettings, RenderMode, RendererSettings,
};
use crate::scene::camera::CameraController;
use crate::scene::light::PointLight;
use crate::scene::model::Model;
use crate::utils::FpsCounter;

// ============================================================================
// Passes
// ============================================================================

/// Every GPU pass of the pipeline. Kept apart from the device so a frame can
/// borrow both at once.
struct Passes {
    batch: SceneBatch,
    atmosphere: AtmosphereEnvironment,
    shadows: Vec<PointShadow>,
    forward: ForwardPass,
    particles: ParticleSystem,
    ssao: SsaoPass,
    volumetric: VolumetricLighting,
    ssr: SsrPass,
    path_tracer: PathTracer,
    composite: CompositePass,
}

/// Which optional rasterized effects run this frame.
#[derive(Debug, Clone, Copy)]
struct Toggles {
    ssao: bool,
    volumetric: bool,
    ssr: bool,
}

impl Passes {
    fn new(
        device: &mut dyn GpuDevice,
        settings: &RendererSettings,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Ok(Self {
            batch: SceneBatch::new(device)?,
            atmosphere: AtmosphereEnvironment::new(device, &settings.atmosphere)?,
            shadows: Vec::new(),
            forward: ForwardPass::new(device, width, height)?,
            particles: ParticleSystem::new(device, &settings.particles)?,
            ssao: SsaoPass::new(device, width, height, &settings.ssao)?,
            volumetric: VolumetricLighting::new(device, width, height, &settings.volumetric)?,
            ssr: SsrPass::new(device, width, height, &settings.ssr)?,
            path_tracer: PathTracer::new(device, width, height, &settings.path_tracer)?,
            composite: CompositePass::new(device, width, height)?,
        })
    }

    fn effects(&self) -> [&dyn Effect; 6] {
        [
            &self.forward,
            &self.ssao,
            &self.volumetric,
            &self.ssr,
            &self.path_tracer,
            &self.composite,
        ]
    }

    fn effects_mut(&mut self) -> [&mut dyn Effect; 6] {
        [
            &mut self.forward,
            &mut self.ssao,
            &mut self.volumetric,
            &mut self.ssr,
            &mut self.path_tracer,
            &mut self.composite,
        ]
    }

    fn rasterize(
        &mut self,
        ctx: &mut RenderContext<'_>,
        toggles: Toggles,
        view_projection: Mat4,
        dt: f32,
    ) {
        let forward = &self.forward;

        // 1. Ambient occlusion from last frame's depth + normals
        let ao = toggles.ssao.then(|| {
            self.ssao.compute(ctx, forward.depth(), forward.normal_spec());
            self.ssao.result()
        });

        // 2. Point shadows
        for shadow in &self.shadows {
            shadow.render(ctx, &self.batch);
        }

        // 3. View cull
        self.batch.cull(ctx, view_projection);

        // 4. Opaque forward
        let shadow_maps: SmallVec<[TextureId; MAX_SHADOW_MAPS]> =
            self.shadows.iter().map(PointShadow::depth_map).collect();
        forward.render(
            ctx,
            &self.batch,
            self.atmosphere.result(),
            ao,
            &shadow_maps,
        );

        // 5. Particles, depth-tested against the opaque depth
        self.particles.update(ctx, dt);
        self.particles.render(ctx, forward.color(), forward.depth());

        // 6. Volumetric lighting
        let volumetric = toggles.volumetric.then(|| {
            self.volumetric.compute(ctx, forward.depth());
            self.volumetric.result()
        });

        // 7. Screen-space reflections
        let reflections = toggles.ssr.then(|| {
            self.ssr.compute(
                ctx,
                forward.color(),
                forward.normal_spec(),
                forward.depth(),
                self.atmosphere.result(),
            );
            self.ssr.result()
        });

        // 8. Composite
        self.composite
            .compute(ctx, forward.color(), volumetric, reflections);
    }

    fn path_trace(&mut self, ctx: &mut RenderContext<'_>) {
        self.path_tracer
            .compute(ctx, &self.batch, self.atmosphere.result());
        self.composite
            .compute(ctx, self.path_tracer.result(), None, None);
    }
}

// ============================================================================
// FrameOrchestrator
// ============================================================================

pub struct FrameOrchestrator<D: GpuDevice> {
    device: D,
    passes: Passes,

    mode: RenderMode,
    projection: ProjectionSettings,
    toggles: Toggles,
    width: u32,
    height: u32,

    frame: FrameState,
    frame_buffer: BufferId,

    lights: Vec<PointLight>,

    /// Batch versions observed by the last `on_update`.
    seen_geometry: u64,
    seen_transforms: u64,

    fps: FpsCounter,
}

impl<D: GpuDevice> FrameOrchestrator<D> {
    /// Builds the whole pipeline at `width` × `height` and computes the
    /// environment cube once.
    ///
    /// Fails with [`LumenError::MissingCapability`] when the device lacks
    /// multi-draw-indirect or storage images, and with
    /// [`LumenError::OutOfMemory`] when any resource cannot be allocated.
    ///
    /// [`LumenError::MissingCapability`]: crate::errors::LumenError::MissingCapability
    /// [`LumenError::OutOfMemory`]: crate::errors::LumenError::OutOfMemory
    pub fn new(mut device: D, settings: RendererSettings, width: u32, height: u32) -> Result<Self> {
        let capabilities = device.capabilities();
        capabilities.require_pipeline_features()?;

        let width = width.max(1);
        let height = height.max(1);
        info!(
            "Frame pipeline: {width}x{height}, mode {:?}, max texture {}",
            settings.mode, capabilities.max_texture_dimension
        );

        let frame_buffer = device.create_buffer(
            &BufferDesc::new("frame_state", wgpu::BufferUsages::UNIFORM)
                .with_size(size_of::<FrameState>() as u64),
        )?;
        let passes = Passes::new(&mut device, &settings, width, height)?;

        let mut frame = FrameState::default();
        frame.set_projection(
            projection_matrix(&settings.projection, width, height),
            settings.projection.near,
            settings.projection.far,
        );

        let mut orchestrator = Self {
            device,
            passes,
            mode: settings.mode,
            projection: settings.projection,
            toggles: Toggles {
                ssao: settings.ssao.enabled,
                volumetric: settings.volumetric.enabled,
                ssr: settings.ssr.enabled,
            },
            width,
            height,
            frame,
            frame_buffer,
            lights: Vec::new(),
            seen_geometry: 0,
            seen_transforms: 0,
            fps: FpsCounter::new(),
        };
        orchestrator.refresh_environment();
        Ok(orchestrator)
    }

    fn refresh_environment(&mut self) {
        let mut ctx = RenderContext::new(&mut self.device, self.frame_buffer);
        self.passes.atmosphere.compute(&mut ctx);
    }

    fn reset_accumulation(&mut self, reason: &str) {
        if self.frame.frame_count != 0 {
            debug!("Accumulation reset: {reason}");
        }
        self.frame.frame_count = 0;
    }

    fn reset_if_path_tracing(&mut self, reason: &str) {
        if self.mode == RenderMode::PathTraced {
            self.reset_accumulation(reason);
        }
    }

    // --- Scene ---

    /// Merges loader output into the scene batch.
    pub fn add_models(&mut self, models: Vec<Model>) -> Result<()> {
        self.passes.batch.add(&mut self.device, models)
    }

    /// Appends lights. Every light with shadow settings gets its own cube
    /// shadow map.
    ///
    /// # Panics
    /// When the total number of shadow-casting lights exceeds
    /// [`MAX_SHADOW_MAPS`].
    pub fn add_lights(&mut self, lights: impl IntoIterator<Item = PointLight>) -> Result<()> {
        for light in lights {
            if let Some(shadow) = light.shadow {
                assert!(
                    self.passes.shadows.len() < MAX_SHADOW_MAPS,
                    "at most {MAX_SHADOW_MAPS} shadow-casting lights are supported"
                );
                self.passes.shadows.push(PointShadow::new(
                    &mut self.device,
                    self.lights.len(),
                    light.position,
                    shadow,
                )?);
            }
            self.lights.push(light);
        }
        self.passes.forward.set_lights(&mut self.device, &self.lights)
    }

    #[must_use]
    pub fn lights(&self) -> &[PointLight] {
        &self.lights
    }

    #[must_use]
    pub fn scene_batch(&self) -> &SceneBatch {
        &self.passes.batch
    }

    /// The batch together with the device, for `for_each_*` edits.
    pub fn scene_batch_mut(&mut self) -> (&mut SceneBatch, &mut D) {
        (&mut self.passes.batch, &mut self.device)
    }

    // --- Mode ---

    #[must_use]
    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Switches mode. Entering either mode restarts accumulation; requesting
    /// the current mode does nothing.
    ///
    /// The path-tracer output already tracks the viewport in both modes, so
    /// no reallocation is needed here.
    pub fn set_mode(&mut self, mode: RenderMode) {
        if mode == self.mode {
            return;
        }
        info!("Render mode: {:?} -> {mode:?}", self.mode);
        self.mode = mode;
        self.reset_accumulation("mode switch");
    }

    pub fn toggle_mode(&mut self) {
        self.set_mode(self.mode.toggled());
    }

    // --- Effect configuration ---

    pub fn set_ssao_enabled(&mut self, enabled: bool) {
        self.toggles.ssao = enabled;
    }

    pub fn set_volumetric_enabled(&mut self, enabled: bool) {
        self.toggles.volumetric = enabled;
    }

    pub fn set_ssr_enabled(&mut self, enabled: bool) {
        self.toggles.ssr = enabled;
    }

    #[must_use]
    pub fn ssao_enabled(&self) -> bool {
        self.toggles.ssao
    }

    #[must_use]
    pub fn volumetric_enabled(&self) -> bool {
        self.toggles.volumetric
    }

    #[must_use]
    pub fn ssr_enabled(&self) -> bool {
        self.toggles.ssr
    }

    /// Edits path-tracer parameters. A real change restarts accumulation
    /// while path tracing.
    pub fn configure_path_tracer(&mut self, f: impl FnOnce(&mut PathTracerSettings)) {
        let current = self.passes.path_tracer.settings();
        let mut next = current;
        f(&mut next);
        if next == current {
            return;
        }
        self.passes
            .path_tracer
            .apply_settings(&mut self.device, &next);
        self.reset_if_path_tracing("path tracer parameters changed");
    }

    /// Edits atmosphere parameters and recomputes the environment cube
    /// before the next frame.
    pub fn configure_atmosphere(
        &mut self,
        f: impl FnOnce(&mut AtmosphereSettings),
    ) -> Result<()> {
        let current = *self.passes.atmosphere.settings();
        let mut next = current;
        f(&mut next);
        if next == current {
            return Ok(());
        }
        self.passes
            .atmosphere
            .set_settings(&mut self.device, &next)?;
        self.reset_if_path_tracing("environment changed");
        Ok(())
    }

    /// Direct access to the volumetric pass parameters.
    pub fn configure_volumetric<R>(
        &mut self,
        f: impl FnOnce(&mut VolumetricLighting, &mut dyn GpuDevice) -> R,
    ) -> R {
        let device: &mut dyn GpuDevice = &mut self.device;
        f(&mut self.passes.volumetric, device)
    }

    pub fn configure_ssao<R>(&mut self, f: impl FnOnce(&mut SsaoPass, &mut dyn GpuDevice) -> R) -> R {
        let device: &mut dyn GpuDevice = &mut self.device;
        f(&mut self.passes.ssao, device)
    }

    pub fn configure_ssr<R>(&mut self, f: impl FnOnce(&mut SsrPass, &mut dyn GpuDevice) -> R) -> R {
        let device: &mut dyn GpuDevice = &mut self.device;
        f(&mut self.passes.ssr, device)
    }

    // --- Frame loop ---

    /// Samples the camera and rebuilds the frame state.
    pub fn on_update(&mut self, dt: f32, camera: &mut dyn CameraController) {
        let sample = camera.sample(dt);

        let geometry = self.passes.batch.geometry_version();
        let transforms = self.passes.batch.transform_version();
        let scene_changed = geometry != self.seen_geometry || transforms != self.seen_transforms;
        self.seen_geometry = geometry;
        self.seen_transforms = transforms;

        if sample.moved {
            self.reset_if_path_tracing("camera moved");
        }
        if scene_changed {
            self.reset_if_path_tracing("scene changed");
        }

        self.frame.set_view(sample.view, sample.position);
    }

    /// Renders and presents one frame of the current mode.
    pub fn on_render(&mut self, dt: f32) {
        if let Some(fps) = self.fps.update(dt) {
            debug!("{fps:.1} FPS ({:?})", self.mode);
        }

        self.device
            .write_buffer(self.frame_buffer, 0, bytemuck::bytes_of(&self.frame));

        let mut ctx = RenderContext::new(&mut self.device, self.frame_buffer);
        if self.passes.atmosphere.is_dirty() {
            self.passes.atmosphere.compute(&mut ctx);
        }
        match self.mode {
            RenderMode::Rasterized => {
                self.passes
                    .rasterize(&mut ctx, self.toggles, self.frame.proj_view, dt);
            }
            RenderMode::PathTraced => self.passes.path_trace(&mut ctx),
        }
        ctx.present(self.passes.composite.result());

        self.frame.frame_count = self.frame.frame_count.saturating_add(1);
    }

    /// Resizes every effect and the projection. Zero-sized viewports are
    /// ignored.
    ///
    /// # Errors
    /// `OutOfMemory` when an output cannot be reallocated. Effects already
    /// resized are shrunk back, so every output keeps the previous viewport
    /// size.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {width}x{height}");
            return Ok(());
        }
        info!("Viewport resize: {}x{} -> {width}x{height}", self.width, self.height);

        let mut effects = self.passes.effects_mut();
        let failure = effects.iter_mut().enumerate().find_map(|(i, effect)| {
            effect
                .set_size(&mut self.device, width, height)
                .err()
                .map(|err| (i, err))
        });
        if let Some((failed, err)) = failure {
            for effect in &mut effects[..=failed] {
                if let Err(restore) = effect.set_size(&mut self.device, self.width, self.height) {
                    error!("Could not restore '{}' after failed resize: {restore}", effect.name());
                }
            }
            return Err(err);
        }
        self.width = width;
        self.height = height;
        self.frame.set_projection(
            projection_matrix(&self.projection, width, height),
            self.projection.near,
            self.projection.far,
        );
        self.reset_if_path_tracing("viewport resized");
        Ok(())
    }

    // --- Accessors ---

    /// Current value of the accumulation counter.
    #[must_use]
    pub fn accumulation_count(&self) -> u32 {
        self.frame.frame_count
    }

    #[must_use]
    pub fn frame_state(&self) -> &FrameState {
        &self.frame
    }

    #[must_use]
    pub fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Every viewport-sized pass.
    #[must_use]
    pub fn effects(&self) -> [&dyn Effect; 6] {
        self.passes.effects()
    }

    /// The texture presented at the end of each frame.
    #[must_use]
    pub fn final_output(&self) -> TextureId {
        self.passes.composite.result()
    }

    #[must_use]
    pub fn forward(&self) -> &ForwardPass {
        &self.passes.forward
    }

    #[must_use]
    pub fn volumetric(&self) -> &VolumetricLighting {
        &self.passes.volumetric
    }

    #[must_use]
    pub fn ssao(&self) -> &SsaoPass {
        &self.passes.ssao
    }

    #[must_use]
    pub fn ssr(&self) -> &SsrPass {
        &self.passes.ssr
    }

    #[must_use]
    pub fn path_tracer(&self) -> &PathTracer {
        &self.passes.path_tracer
    }

    #[must_use]
    pub fn atmosphere(&self) -> &AtmosphereEnvironment {
        &self.passes.atmosphere
    }

    #[must_use]
    pub fn particles(&self) -> &ParticleSystem {
        &self.passes.particles
    }

    #[must_use]
    pub fn shadows(&self) -> &[PointShadow] {
        &self.passes.shadows
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Frame rate of the last completed one-second window.
    #[must_use]
    pub fn fps(&self) -> f32 {
        self.fps.current()
    }
}

fn projection_matrix(projection: &ProjectionSettings, width: u32, height: u32) -> Mat4 {
    Mat4::perspective_rh(
        projection.fov_y_degrees.to_radians(),
        width as f32 / height as f32,
        projection.near,
        projection.far,
    )
}
