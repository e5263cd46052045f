//! wgpu Backend
//!
//! [`WgpuDevice`] implements [`GpuDevice`] on a caller-supplied
//! `wgpu::Device` / `wgpu::Queue`. WGSL sources are looked up by program
//! label in a [`ShaderLibrary`].
//!
//! Binding model:
//! - group 0: the slot bindings of each dispatch / draw, one entry per slot
//! - group 1: the program's parameter block (binding 0) and a linear
//!   sampler (binding 1)
//!
//! Group 0 layouts are derived from the bound resources, so pipelines are
//! cached per program and layout. wgpu tracks resource hazards itself;
//! [`memory_barrier`](GpuDevice::memory_barrier) only traces.

use std::borrow::Cow;

use glam::Vec4;
use log::{debug, info, trace, warn};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::device::{Capabilities, GpuDevice};
use super::resources::{
    Access, BarrierFlags, Binding, Bindings, BufferDesc, BufferId, GraphicsState, IndirectDraw,
    ParamDecl, ProgramDesc, ProgramId, ProgramStage, RenderPassDesc, TextureDesc, TextureId,
    TextureKind, UniformKind, UniformValue, VertexInput,
};
use crate::errors::{LumenError, Result};
use crate::scene::model::Vertex;

/// Buffers are never created smaller than this.
const MIN_BUFFER_SIZE: u64 = 16;

const PARAMS_GROUP: u32 = 1;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 5] = [
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x3,
        offset: 0,
        shader_location: 0,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 16,
        shader_location: 1,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x3,
        offset: 32,
        shader_location: 2,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x3,
        offset: 48,
        shader_location: 3,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x3,
        offset: 64,
        shader_location: 4,
    },
];

// ─── Shader library ───────────────────────────────────────────────────────────

/// WGSL sources keyed by program label.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    sources: FxHashMap<&'static str, Cow<'static, str>>,
}

impl ShaderLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, label: &'static str, source: impl Into<Cow<'static, str>>) -> Self {
        self.insert(label, source);
        self
    }

    pub fn insert(&mut self, label: &'static str, source: impl Into<Cow<'static, str>>) {
        self.sources.insert(label, source.into());
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&str> {
        self.sources.get(label).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

// ─── Resource slots ───────────────────────────────────────────────────────────

struct BufferSlot {
    desc: BufferDesc,
    buffer: wgpu::Buffer,
    /// Logical size; the allocation may be padded.
    len: u64,
}

struct TextureSlot {
    desc: TextureDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    storage_view: Option<wgpu::TextureView>,
}

enum Pipeline {
    Compute(wgpu::ComputePipeline),
    Render(wgpu::RenderPipeline),
}

struct CachedPipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: Pipeline,
}

type LayoutKey = SmallVec<[wgpu::BindGroupLayoutEntry; 12]>;

struct ProgramSlot {
    desc: ProgramDesc,
    module: wgpu::ShaderModule,
    layout: ParamBlockLayout,
    params: wgpu::Buffer,
    params_group: wgpu::BindGroup,
    pipelines: FxHashMap<LayoutKey, CachedPipeline>,
}

// ─── Device ───────────────────────────────────────────────────────────────────

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shaders: ShaderLibrary,
    capabilities: Capabilities,

    params_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    buffers: SlotMap<BufferId, BufferSlot>,
    textures: SlotMap<TextureId, TextureSlot>,
    programs: SlotMap<ProgramId, ProgramSlot>,
    current: Option<ProgramId>,

    encoder: Option<wgpu::CommandEncoder>,
    render_pass: Option<wgpu::RenderPass<'static>>,

    presented: Option<TextureId>,
    frames: u64,
}

impl WgpuDevice {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, shaders: ShaderLibrary) -> Self {
        let features = device.features();
        let limits = device.limits();
        let capabilities = Capabilities {
            multi_draw_indirect: features.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE),
            storage_images: limits.max_storage_textures_per_shader_stage > 0,
            max_texture_dimension: limits.max_texture_dimension_2d,
        };

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("program_params_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear_clamp"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        info!(
            "wgpu device: {} shaders, capabilities {capabilities:?}",
            shaders.len()
        );

        Self {
            device,
            queue,
            shaders,
            capabilities,
            params_layout,
            sampler,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            current: None,
            encoder: None,
            render_pass: None,
            presented: None,
            frames: 0,
        }
    }

    /// Requests a high-performance adapter and a device with every limit it
    /// offers.
    pub async fn request(shaders: ShaderLibrary) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| LumenError::DeviceRequest(e.to_string()))?;
        info!("Adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("lumen"),
                required_features: adapter.features() & wgpu::Features::INDIRECT_FIRST_INSTANCE,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| LumenError::DeviceRequest(e.to_string()))?;

        Ok(Self::new(device, queue, shaders))
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The underlying texture, e.g. for a blit to a surface.
    #[must_use]
    pub fn texture(&self, texture: TextureId) -> &wgpu::Texture {
        &self.textures[texture].texture
    }

    /// Texture handed to the last [`present`](GpuDevice::present).
    #[must_use]
    pub fn presented(&self) -> Option<TextureId> {
        self.presented
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Submits recorded work. Queue writes are ordered against submissions,
    /// so this runs before every CPU upload.
    fn flush(&mut self) {
        assert!(
            self.render_pass.is_none(),
            "queue write issued inside a render pass"
        );
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit([encoder.finish()]);
        }
    }

    fn current_program(&self, command: &str) -> ProgramId {
        match self.current {
            Some(program) => program,
            None => panic!("{command} issued with no program in use"),
        }
    }

    fn create_gpu_buffer(&self, desc: &BufferDesc, len: u64) -> Result<wgpu::Buffer> {
        let size = len.next_multiple_of(4).max(MIN_BUFFER_SIZE);
        if size > self.device.limits().max_buffer_size {
            return Err(LumenError::OutOfMemory {
                label: desc.label.to_owned(),
                requested: size,
            });
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: desc.usage,
            mapped_at_creation: false,
        }))
    }

    fn create_gpu_texture(&self, desc: &TextureDesc) -> Result<TextureSlot> {
        let max = self.capabilities.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(LumenError::OutOfMemory {
                label: desc.label.to_owned(),
                requested: desc.byte_size(),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers(),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: texture_usage(desc.format),
            view_formats: &[],
        });

        let (sample_dim, storage_dim) = match desc.kind {
            TextureKind::D2 => (wgpu::TextureViewDimension::D2, wgpu::TextureViewDimension::D2),
            TextureKind::Cube => (
                wgpu::TextureViewDimension::Cube,
                wgpu::TextureViewDimension::D2Array,
            ),
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.label),
            dimension: Some(sample_dim),
            ..Default::default()
        });
        let storage_view = supports_storage(desc.format).then(|| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(desc.label),
                dimension: Some(storage_dim),
                ..Default::default()
            })
        });

        Ok(TextureSlot {
            desc: desc.clone(),
            texture,
            view,
            storage_view,
        })
    }

    /// Group 0 layout entries for `bindings`.
    fn layout_entries(&self, bindings: &Bindings, visibility: wgpu::ShaderStages) -> LayoutKey {
        let mut entries: LayoutKey = bindings
            .iter()
            .map(|(slot, binding)| wgpu::BindGroupLayoutEntry {
                binding: slot,
                visibility,
                ty: self.binding_type(binding),
                count: None,
            })
            .collect();
        entries.sort_by_key(|e| e.binding);
        entries
    }

    fn binding_type(&self, binding: &Binding) -> wgpu::BindingType {
        match *binding {
            Binding::Texture(texture) => {
                let desc = &self.textures[texture].desc;
                wgpu::BindingType::Texture {
                    sample_type: sample_type(desc.format),
                    view_dimension: match desc.kind {
                        TextureKind::D2 => wgpu::TextureViewDimension::D2,
                        TextureKind::Cube => wgpu::TextureViewDimension::Cube,
                    },
                    multisampled: false,
                }
            }
            Binding::Image { texture, access } => {
                let desc = &self.textures[texture].desc;
                wgpu::BindingType::StorageTexture {
                    access: match access {
                        Access::ReadOnly => wgpu::StorageTextureAccess::ReadOnly,
                        Access::WriteOnly => wgpu::StorageTextureAccess::WriteOnly,
                        Access::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
                    },
                    format: desc.format,
                    view_dimension: match desc.kind {
                        TextureKind::D2 => wgpu::TextureViewDimension::D2,
                        TextureKind::Cube => wgpu::TextureViewDimension::D2Array,
                    },
                }
            }
            Binding::StorageBuffer { writable, .. } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: !writable,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Binding::UniformBuffer(_) => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        }
    }

    fn ensure_pipeline(&mut self, program: ProgramId, key: &LayoutKey) {
        if self.programs[program].pipelines.contains_key(key) {
            return;
        }

        let slot = &self.programs[program];
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(slot.desc.label),
                entries: key,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(slot.desc.label),
                bind_group_layouts: &[Some(&layout), Some(&self.params_layout)],
                immediate_size: 0,
            });

        let pipeline = match slot.desc.stage {
            ProgramStage::Compute { .. } => Pipeline::Compute(self.device.create_compute_pipeline(
                &wgpu::ComputePipelineDescriptor {
                    label: Some(slot.desc.label),
                    layout: Some(&pipeline_layout),
                    module: &slot.module,
                    entry_point: Some("main"),
                    compilation_options: Default::default(),
                    cache: None,
                },
            )),
            ProgramStage::Graphics(state) => Pipeline::Render(create_render_pipeline(
                &self.device,
                slot.desc.label,
                &slot.module,
                &pipeline_layout,
                &state,
            )),
        };

        debug!(
            "Pipeline '{}' built for {} bindings",
            slot.desc.label,
            key.len()
        );
        self.programs[program]
            .pipelines
            .insert(key.clone(), CachedPipeline { layout, pipeline });
    }

    fn create_bind_group(&self, layout: &wgpu::BindGroupLayout, bindings: &Bindings) -> wgpu::BindGroup {
        let entries: SmallVec<[wgpu::BindGroupEntry<'_>; 12]> = bindings
            .iter()
            .map(|(slot, binding)| wgpu::BindGroupEntry {
                binding: slot,
                resource: match *binding {
                    Binding::Texture(texture) => {
                        wgpu::BindingResource::TextureView(&self.textures[texture].view)
                    }
                    Binding::Image { texture, .. } => {
                        let slot = &self.textures[texture];
                        let Some(view) = slot.storage_view.as_ref() else {
                            panic!(
                                "texture '{}' ({:?}) cannot be bound as a storage image",
                                slot.desc.label, slot.desc.format
                            );
                        };
                        wgpu::BindingResource::TextureView(view)
                    }
                    Binding::StorageBuffer { buffer, .. } | Binding::UniformBuffer(buffer) => {
                        self.buffers[buffer].buffer.as_entire_binding()
                    }
                },
            })
            .collect();

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        })
    }

    /// Prepares pipeline and bind group of the current program for a
    /// command bound to `bindings`.
    fn prepare(
        &mut self,
        command: &str,
        bindings: &Bindings,
        visibility: wgpu::ShaderStages,
    ) -> (ProgramId, LayoutKey, wgpu::BindGroup) {
        let program = self.current_program(command);
        let key = self.layout_entries(bindings, visibility);
        self.ensure_pipeline(program, &key);
        let bind_group = self.create_bind_group(&self.programs[program].pipelines[&key].layout, bindings);
        (program, key, bind_group)
    }

    fn clear_layer(&mut self, texture: TextureId, layer: u32, value: Vec4) {
        let slot = &self.textures[texture];
        let view = attachment_view(slot, Some(layer));
        let depth = slot.desc.format.is_depth_stencil_format();

        let color_attachment = [Some(wgpu::RenderPassColorAttachment {
            view: &view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(to_color(value)),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })];
        let color_attachments: &[Option<wgpu::RenderPassColorAttachment<'_>>] =
            if depth { &[] } else { &color_attachment };
        let encoder = encoder(&mut self.encoder, &self.device);
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear_texture"),
            color_attachments,
            depth_stencil_attachment: depth.then(|| wgpu::RenderPassDepthStencilAttachment {
                view: &view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(value.x),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }
}

impl GpuDevice for WgpuDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        let buffer = self.create_gpu_buffer(desc, desc.size)?;
        Ok(self.buffers.insert(BufferSlot {
            desc: desc.clone(),
            buffer,
            len: desc.size,
        }))
    }

    fn allocate_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()> {
        self.flush();
        let len = data.len() as u64;
        let slot = &self.buffers[buffer];
        if len > slot.buffer.size() {
            let replacement = self.create_gpu_buffer(&slot.desc, len)?;
            let slot = &mut self.buffers[buffer];
            slot.buffer.destroy();
            slot.buffer = replacement;
            trace!("Buffer '{}' grown to {len} bytes", slot.desc.label);
        }

        let slot = &mut self.buffers[buffer];
        slot.len = len;
        if !data.is_empty() {
            write_padded(&self.queue, &slot.buffer, 0, data);
        }
        Ok(())
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let slot = &self.buffers[buffer];
        assert!(
            offset + data.len() as u64 <= slot.len,
            "write of {} bytes at {offset} exceeds buffer '{}' ({} bytes)",
            data.len(),
            slot.desc.label,
            slot.len
        );
        if data.is_empty() {
            return;
        }
        self.flush();
        let slot = &self.buffers[buffer];
        write_padded(&self.queue, &slot.buffer, offset, data);
    }

    fn buffer_size(&self, buffer: BufferId) -> u64 {
        self.buffers[buffer].len
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.remove(buffer) {
            slot.buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        let slot = self.create_gpu_texture(desc)?;
        Ok(self.textures.insert(slot))
    }

    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> Result<()> {
        let mut desc = self.textures[texture].desc.clone();
        if desc.size() == (width, height) {
            return Ok(());
        }
        desc.width = width;
        desc.height = height;
        let replacement = self.create_gpu_texture(&desc)?;
        let old = std::mem::replace(&mut self.textures[texture], replacement);
        old.texture.destroy();
        debug!("Texture '{}' resized to {width}x{height}", desc.label);
        Ok(())
    }

    fn texture_desc(&self, texture: TextureId) -> &TextureDesc {
        &self.textures[texture].desc
    }

    fn clear_texture(&mut self, texture: TextureId, value: Vec4) {
        assert!(
            self.render_pass.is_none(),
            "clear_texture issued inside a render pass"
        );
        for layer in 0..self.textures[texture].desc.layers() {
            self.clear_layer(texture, layer, value);
        }
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(slot) = self.textures.remove(texture) {
            slot.texture.destroy();
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId> {
        let Some(source) = self.shaders.get(desc.label) else {
            return Err(LumenError::ProgramCreation {
                label: desc.label,
                reason: "no WGSL source registered".to_owned(),
            });
        };
        if let ProgramStage::Compute { workgroup_size } = desc.stage
            && workgroup_size.contains(&0)
        {
            return Err(LumenError::ProgramCreation {
                label: desc.label,
                reason: format!("invalid workgroup size {workgroup_size:?}"),
            });
        }

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });

        let layout = ParamBlockLayout::new(desc.params);
        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: layout.size(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(desc.label),
            layout: &self.params_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        debug!("Program '{}' created ({} params)", desc.label, desc.params.len());
        Ok(self.programs.insert(ProgramSlot {
            desc: desc.clone(),
            module,
            layout,
            params,
            params_group,
            pipelines: FxHashMap::default(),
        }))
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = Some(program);
    }

    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue) {
        let slot = &self.programs[program];
        let Some((offset, kind)) = slot.layout.get(name) else {
            warn!("Program '{}' has no parameter '{name}'", slot.desc.label);
            return;
        };
        if kind != value.kind() {
            warn!(
                "Parameter '{name}' of '{}' is {kind:?}, got {:?}",
                slot.desc.label,
                value.kind()
            );
            return;
        }
        self.flush();
        let slot = &self.programs[program];
        self.queue.write_buffer(&slot.params, offset, &value.to_bytes());
    }

    fn dispatch(&mut self, bindings: &Bindings, groups: [u32; 3]) {
        assert!(
            self.render_pass.is_none(),
            "dispatch issued inside a render pass"
        );
        let (program, key, bind_group) = self.prepare("dispatch", bindings, wgpu::ShaderStages::COMPUTE);

        let slot = &self.programs[program];
        let Pipeline::Compute(pipeline) = &slot.pipelines[&key].pipeline else {
            panic!("dispatch with graphics program '{}'", slot.desc.label);
        };
        let encoder = encoder(&mut self.encoder, &self.device);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(slot.desc.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_bind_group(PARAMS_GROUP, &slot.params_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
    }

    fn memory_barrier(&mut self, flags: BarrierFlags) {
        trace!("barrier {flags:?}");
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        assert!(
            self.render_pass.is_none(),
            "render pass '{}' begun inside another render pass",
            desc.label
        );

        let color_views: SmallVec<[wgpu::TextureView; 4]> = desc
            .color
            .iter()
            .map(|c| attachment_view(&self.textures[c.texture], None))
            .collect();
        let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment<'_>>; 4]> = desc
            .color
            .iter()
            .zip(&color_views)
            .map(|(c, view)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: c
                            .clear
                            .map_or(wgpu::LoadOp::Load, |v| wgpu::LoadOp::Clear(to_color(v))),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let depth_view = desc
            .depth
            .map(|d| attachment_view(&self.textures[d.texture], d.layer));
        let depth_stencil_attachment =
            desc.depth
                .zip(depth_view.as_ref())
                .map(|(d, view)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: d.clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let encoder = encoder(&mut self.encoder, &self.device);
        let pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(desc.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            })
            .forget_lifetime();
        self.render_pass = Some(pass);
    }

    fn draw_indexed_indirect(&mut self, bindings: &Bindings, draw: &IndirectDraw) {
        if draw.draw_count == 0 {
            return;
        }
        let (program, key, bind_group) = self.prepare(
            "draw_indexed_indirect",
            bindings,
            wgpu::ShaderStages::VERTEX_FRAGMENT,
        );

        let slot = &self.programs[program];
        let Pipeline::Render(pipeline) = &slot.pipelines[&key].pipeline else {
            panic!("draw with compute program '{}'", slot.desc.label);
        };
        let Some(pass) = self.render_pass.as_mut() else {
            panic!("draw issued outside a render pass");
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_bind_group(PARAMS_GROUP, &slot.params_group, &[]);
        pass.set_vertex_buffer(0, self.buffers[draw.vertex_buffer].buffer.slice(..));
        pass.set_index_buffer(
            self.buffers[draw.index_buffer].buffer.slice(..),
            wgpu::IndexFormat::Uint32,
        );
        pass.multi_draw_indexed_indirect(
            &self.buffers[draw.indirect_buffer].buffer,
            0,
            draw.draw_count,
        );
    }

    fn draw_arrays(&mut self, bindings: &Bindings, vertex_count: u32, instance_count: u32) {
        if vertex_count == 0 || instance_count == 0 {
            return;
        }
        let (program, key, bind_group) =
            self.prepare("draw_arrays", bindings, wgpu::ShaderStages::VERTEX_FRAGMENT);

        let slot = &self.programs[program];
        let Pipeline::Render(pipeline) = &slot.pipelines[&key].pipeline else {
            panic!("draw with compute program '{}'", slot.desc.label);
        };
        let Some(pass) = self.render_pass.as_mut() else {
            panic!("draw issued outside a render pass");
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_bind_group(PARAMS_GROUP, &slot.params_group, &[]);
        pass.draw(0..vertex_count, 0..instance_count);
    }

    fn end_render_pass(&mut self) {
        let Some(pass) = self.render_pass.take() else {
            panic!("end_render_pass without an open render pass");
        };
        drop(pass);
    }

    fn present(&mut self, texture: TextureId) {
        self.flush();
        self.presented = Some(texture);
        self.frames += 1;
        trace!(
            "Frame {} presented '{}'",
            self.frames, self.textures[texture].desc.label
        );
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn encoder<'e>(
    slot: &'e mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'e mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("lumen_frame"),
        })
    })
}

/// Offsets of each program parameter in its uniform block, std140 rules.
#[derive(Debug, Clone, Default)]
pub struct ParamBlockLayout {
    offsets: FxHashMap<&'static str, (u64, UniformKind)>,
    size: u64,
}

impl ParamBlockLayout {
    #[must_use]
    pub fn new(params: &[ParamDecl]) -> Self {
        let mut offsets = FxHashMap::default();
        let mut offset: u64 = 0;
        for param in params {
            let (size, align) = param.kind.layout();
            offset = offset.next_multiple_of(align);
            offsets.insert(param.name, (offset, param.kind));
            offset += size;
        }
        Self {
            offsets,
            size: offset.next_multiple_of(16).max(16),
        }
    }

    /// Byte offset and type of a declared parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<(u64, UniformKind)> {
        self.offsets.get(name).copied()
    }

    /// Padded block size; never below 16 bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// `queue.write_buffer` needs 4-byte aligned sizes.
fn write_padded(queue: &wgpu::Queue, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
    if data.len() % 4 == 0 {
        queue.write_buffer(buffer, offset, data);
    } else {
        let mut padded = data.to_vec();
        padded.resize(data.len().next_multiple_of(4), 0);
        queue.write_buffer(buffer, offset, &padded);
    }
}

fn supports_storage(format: wgpu::TextureFormat) -> bool {
    use wgpu::TextureFormat as F;
    matches!(
        format,
        F::Rgba8Unorm | F::Rgba16Float | F::Rgba32Float | F::R32Float | F::R32Uint
    )
}

fn texture_usage(format: wgpu::TextureFormat) -> wgpu::TextureUsages {
    let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT;
    if !format.is_depth_stencil_format() {
        usage |= wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    }
    if supports_storage(format) {
        usage |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    usage
}

fn sample_type(format: wgpu::TextureFormat) -> wgpu::TextureSampleType {
    use wgpu::TextureFormat as F;
    match format {
        F::Depth32Float => wgpu::TextureSampleType::Depth,
        F::R32Uint => wgpu::TextureSampleType::Uint,
        F::R32Float | F::Rg32Float | F::Rgba32Float => {
            wgpu::TextureSampleType::Float { filterable: false }
        }
        _ => wgpu::TextureSampleType::Float { filterable: true },
    }
}

/// Single-layer 2D view for use as a render attachment.
fn attachment_view(slot: &TextureSlot, layer: Option<u32>) -> wgpu::TextureView {
    slot.texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(slot.desc.label),
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_array_layer: layer.unwrap_or(0),
        array_layer_count: Some(1),
        ..Default::default()
    })
}

fn to_color(v: Vec4) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(v.x),
        g: f64::from(v.y),
        b: f64::from(v.z),
        a: f64::from(v.w),
    }
}

fn create_render_pipeline(
    device: &wgpu::Device,
    label: &'static str,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    state: &GraphicsState,
) -> wgpu::RenderPipeline {
    let vertex_layout = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    };
    let vertex_buffers: &[wgpu::VertexBufferLayout<'_>] = match state.vertex_input {
        VertexInput::None => &[],
        VertexInput::SceneVertex => std::slice::from_ref(&vertex_layout),
    };

    let blend = state.alpha_blend.then_some(wgpu::BlendState::ALPHA_BLENDING);
    let targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> = state
        .color_formats
        .iter()
        .map(|&format| {
            Some(wgpu::ColorTargetState {
                format,
                // Integer targets cannot blend.
                blend: if format == wgpu::TextureFormat::R32Uint { None } else { blend },
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: vertex_buffers,
            compilation_options: Default::default(),
        },
        fragment: (!targets.is_empty()).then(|| wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: state.topology,
            ..Default::default()
        },
        depth_stencil: state.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: Some(state.depth_write),
            depth_compare: Some(state.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}
