//! Headless Device
//!
//! A software [`GpuDevice`] that keeps every buffer and texture on the CPU.
//! It is the verification instrument for the pipeline:
//!
//! - Compute programs that declare a [`ReferenceKernel`](super::resources::ReferenceKernel) are executed on the
//!   CPU against the bound resources.
//! - Every command is appended to a log ([`Command`]) that tests can inspect.
//! - Indirect draws are validated against the bound index / vertex buffers.
//! - Texel and buffer accesses are bounds-checked and panic when violated.
//! - Writes made by a dispatch are tracked until a barrier makes them visible;
//!   a read through an access kind no barrier covered is recorded as a
//!   [`Hazard`].
//! - Allocations are charged against a memory budget and fail with
//!   [`LumenError::OutOfMemory`] once it is exceeded.
//!
//! Graphics programs are not rasterized. Render passes only apply their
//! attachment clears.

use std::fmt;

use bytemuck::Pod;
use glam::{Mat4, Vec2, Vec3, Vec4};
use log::{debug, error, warn};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::device::{Capabilities, GpuDevice};
use super::resources::{
    Access, BarrierFlags, Binding, Bindings, BufferDesc, BufferId, IndirectDraw, ProgramDesc,
    ProgramId, ProgramStage, RenderPassDesc, TextureDesc, TextureId,
    UniformValue, FRAME_STATE_SLOT,
};
use crate::errors::{LumenError, Result};
use crate::renderer::frame::FrameState;
use crate::scene::model::{DrawCommand, Vertex};

/// Default allocation budget: 2 GiB.
pub const DEFAULT_MEMORY_BUDGET: u64 = 2 << 30;

// ─── Texel storage ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Layer {
    fill: Vec4,
    texels: Option<Vec<Vec4>>,
}

/// CPU texel storage of one texture.
///
/// Layers are materialized lazily: a cleared layer only stores its clear
/// value until the first texel is written.
#[derive(Debug, Clone)]
pub struct TexelImage {
    width: u32,
    height: u32,
    layers: Vec<Layer>,
}

impl TexelImage {
    fn new(width: u32, height: u32, layers: u32) -> Self {
        Self {
            width,
            height,
            layers: vec![
                Layer {
                    fill: Vec4::ZERO,
                    texels: None,
                };
                layers as usize
            ],
        }
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    #[must_use]
    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }

    #[inline]
    fn index(&self, x: u32, y: u32, layer: u32) -> usize {
        assert!(
            x < self.width && y < self.height && (layer as usize) < self.layers.len(),
            "texel ({x}, {y}, layer {layer}) out of bounds for {}x{}x{} image",
            self.width,
            self.height,
            self.layers.len()
        );
        (y * self.width + x) as usize
    }

    /// # Panics
    /// When the coordinate lies outside the image.
    #[must_use]
    pub fn load(&self, x: u32, y: u32, layer: u32) -> Vec4 {
        let i = self.index(x, y, layer);
        let l = &self.layers[layer as usize];
        l.texels.as_ref().map_or(l.fill, |t| t[i])
    }

    /// # Panics
    /// When the coordinate lies outside the image.
    pub fn store(&mut self, x: u32, y: u32, layer: u32, value: Vec4) {
        let i = self.index(x, y, layer);
        let n = (self.width * self.height) as usize;
        let l = &mut self.layers[layer as usize];
        let fill = l.fill;
        l.texels.get_or_insert_with(|| vec![fill; n])[i] = value;
    }

    /// Nearest-texel lookup with clamped normalized coordinates.
    #[must_use]
    pub fn sample(&self, uv: Vec2, layer: u32) -> Vec4 {
        let uv = uv.clamp(Vec2::ZERO, Vec2::ONE);
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        self.load(x, y, layer)
    }

    /// Cube lookup by direction (+X, -X, +Y, -Y, +Z, -Z face order).
    #[must_use]
    pub fn sample_cube(&self, dir: Vec3) -> Vec4 {
        let a = dir.abs();
        let (face, u, v, m) = if a.x >= a.y && a.x >= a.z {
            if dir.x > 0.0 {
                (0, -dir.z, -dir.y, a.x)
            } else {
                (1, dir.z, -dir.y, a.x)
            }
        } else if a.y >= a.z {
            if dir.y > 0.0 {
                (2, dir.x, dir.z, a.y)
            } else {
                (3, dir.x, -dir.z, a.y)
            }
        } else if dir.z > 0.0 {
            (4, dir.x, -dir.y, a.z)
        } else {
            (5, -dir.x, -dir.y, a.z)
        };
        if m == 0.0 {
            return self.load(0, 0, 0);
        }
        let uv = Vec2::new(u / m, v / m) * 0.5 + 0.5;
        self.sample(uv, face.min(self.layer_count() - 1))
    }

    fn clear(&mut self, value: Vec4) {
        for l in &mut self.layers {
            l.fill = value;
            l.texels = None;
        }
    }

    fn clear_layer(&mut self, layer: u32, value: Vec4) {
        let l = &mut self.layers[layer as usize];
        l.fill = value;
        l.texels = None;
    }

    /// Whether any layer holds individually written texels.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.layers.iter().any(|l| l.texels.is_some())
    }
}

// ─── Logs ─────────────────────────────────────────────────────────────────────

/// A buffer or texture referenced by hazard tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Buffer(BufferId),
    Texture(TextureId),
}

/// A read that no barrier made visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hazard {
    /// Program (or `"present"`) performing the read.
    pub reader: &'static str,
    pub resource: ResourceRef,
    /// Barrier scope the read required.
    pub required: BarrierFlags,
}

impl fmt::Display for Hazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reads {:?} without a {:?} barrier",
            self.reader, self.resource, self.required
        )
    }
}

/// Entry of the headless command log.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AllocateBuffer { label: &'static str, size: u64 },
    UploadBuffer { label: &'static str, offset: u64, size: u64 },
    UseProgram(&'static str),
    Dispatch { program: &'static str, groups: [u32; 3] },
    Barrier(BarrierFlags),
    BeginRenderPass(&'static str),
    DrawIndexedIndirect { program: &'static str, draw_count: u32, visible: u32 },
    DrawArrays { program: &'static str, vertex_count: u32, instance_count: u32 },
    EndRenderPass,
    Present(&'static str),
}

// ─── Device ───────────────────────────────────────────────────────────────────

struct BufferSlot {
    desc: BufferDesc,
    data: Vec<u8>,
}

struct TextureSlot {
    desc: TextureDesc,
    image: TexelImage,
}

struct ProgramSlot {
    desc: ProgramDesc,
    uniforms: FxHashMap<&'static str, UniformValue>,
}

/// CPU reference implementation of [`GpuDevice`].
pub struct HeadlessDevice {
    capabilities: Capabilities,
    memory_budget: u64,
    allocated: u64,

    buffers: SlotMap<BufferId, BufferSlot>,
    textures: SlotMap<TextureId, TextureSlot>,
    programs: SlotMap<ProgramId, ProgramSlot>,

    current_program: Option<ProgramId>,
    render_pass: Option<RenderPassDesc>,

    /// Resources written by a dispatch, with the scopes made visible since.
    pending: FxHashMap<ResourceRef, BarrierFlags>,
    hazards: Vec<Hazard>,
    commands: Vec<Command>,
    /// Most recent entries kept in each log; `None` keeps everything.
    log_limit: Option<usize>,
    presented: Option<TextureId>,
    frames_presented: u64,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    #[must_use]
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            allocated: 0,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            current_program: None,
            render_pass: None,
            pending: FxHashMap::default(),
            hazards: Vec::new(),
            commands: Vec::new(),
            log_limit: None,
            presented: None,
            frames_presented: 0,
        }
    }

    #[must_use]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Keeps only the `entries` most recent commands and hazards. Without a
    /// limit both logs grow until drained with [`take_commands`] /
    /// [`take_hazards`].
    ///
    /// [`take_commands`]: Self::take_commands
    /// [`take_hazards`]: Self::take_hazards
    #[must_use]
    pub fn with_log_limit(mut self, entries: usize) -> Self {
        self.log_limit = Some(entries);
        self
    }

    fn record(&mut self, command: Command) {
        self.commands.push(command);
        trim_log(&mut self.commands, self.log_limit);
    }

    // --- Inspection ---

    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drains the command log.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    #[must_use]
    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    /// Drains the hazard log.
    pub fn take_hazards(&mut self) -> Vec<Hazard> {
        std::mem::take(&mut self.hazards)
    }

    #[must_use]
    pub fn buffer_bytes(&self, buffer: BufferId) -> &[u8] {
        &self.buffers[buffer].data
    }

    /// Buffer contents reinterpreted as `T`.
    #[must_use]
    pub fn read_buffer<T: Pod>(&self, buffer: BufferId) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.buffers[buffer].data)
    }

    #[must_use]
    pub fn texture_image(&self, texture: TextureId) -> &TexelImage {
        &self.textures[texture].image
    }

    /// Label lookup for tests and diagnostics.
    #[must_use]
    pub fn find_program(&self, label: &str) -> Option<ProgramId> {
        self.programs
            .iter()
            .find(|(_, p)| p.desc.label == label)
            .map(|(id, _)| id)
    }

    #[must_use]
    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.programs[program].uniforms.get(name).copied()
    }

    #[must_use]
    pub fn presented(&self) -> Option<TextureId> {
        self.presented
    }

    #[must_use]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    // --- Internals ---

    fn charge(&mut self, label: &str, old: u64, new: u64) -> Result<()> {
        let total = self.allocated - old + new;
        if total > self.memory_budget {
            error!(
                "Allocation of {new} bytes for '{label}' exceeds budget ({} of {} bytes in use)",
                self.allocated, self.memory_budget
            );
            return Err(LumenError::OutOfMemory {
                label: label.to_string(),
                requested: new,
            });
        }
        self.allocated = total;
        Ok(())
    }

    fn check_read(&mut self, reader: &'static str, resource: ResourceRef, kind: BarrierFlags) {
        if let Some(visible) = self.pending.get(&resource)
            && !visible.contains(kind)
        {
            let hazard = Hazard {
                reader,
                resource,
                required: kind,
            };
            error!("Memory hazard: {hazard}");
            self.hazards.push(hazard);
            trim_log(&mut self.hazards, self.log_limit);
        }
    }

    fn check_bindings(&mut self, reader: &'static str, bindings: &Bindings) {
        for (_, binding) in bindings.iter() {
            match *binding {
                Binding::Texture(t) => {
                    self.check_read(reader, ResourceRef::Texture(t), BarrierFlags::TEXTURE_FETCH);
                }
                Binding::Image { texture, access } if access.reads() => self.check_read(
                    reader,
                    ResourceRef::Texture(texture),
                    BarrierFlags::SHADER_IMAGE_ACCESS,
                ),
                Binding::Image { .. } => {}
                Binding::StorageBuffer { buffer, .. } => self.check_read(
                    reader,
                    ResourceRef::Buffer(buffer),
                    BarrierFlags::SHADER_STORAGE,
                ),
                Binding::UniformBuffer(b) => {
                    self.check_read(reader, ResourceRef::Buffer(b), BarrierFlags::UNIFORM);
                }
            }
        }
    }

    fn mark_writes(&mut self, bindings: &Bindings) {
        for (_, binding) in bindings.iter() {
            let written = match *binding {
                Binding::Image { texture, access } if access.writes() => {
                    Some(ResourceRef::Texture(texture))
                }
                Binding::StorageBuffer {
                    buffer,
                    writable: true,
                } => Some(ResourceRef::Buffer(buffer)),
                _ => None,
            };
            if let Some(r) = written {
                self.pending.insert(r, BarrierFlags::empty());
            }
        }
    }

    fn current_program(&self, op: &str) -> ProgramId {
        let Some(program) = self.current_program else {
            panic!("{op} issued without a bound program");
        };
        program
    }

    fn element_count<T>(&self, buffer: BufferId) -> usize {
        self.buffers[buffer].data.len() / size_of::<T>()
    }
}

fn trim_log<T>(log: &mut Vec<T>, limit: Option<usize>) {
    if let Some(limit) = limit
        && log.len() > limit
    {
        log.drain(..log.len() - limit);
    }
}

impl GpuDevice for HeadlessDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        self.charge(desc.label, 0, desc.size)?;
        Ok(self.buffers.insert(BufferSlot {
            desc: desc.clone(),
            data: vec![0; desc.size as usize],
        }))
    }

    fn allocate_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()> {
        let (label, old) = {
            let slot = &self.buffers[buffer];
            (slot.desc.label, slot.data.len() as u64)
        };
        self.charge(label, old, data.len() as u64)?;

        let slot = &mut self.buffers[buffer];
        slot.data.clear();
        slot.data.extend_from_slice(data);
        slot.desc.size = data.len() as u64;
        self.pending.remove(&ResourceRef::Buffer(buffer));
        self.record(Command::AllocateBuffer {
            label,
            size: data.len() as u64,
        });
        Ok(())
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let slot = &mut self.buffers[buffer];
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= slot.data.len(),
            "write_buffer on '{}' out of range: {start}..{end} exceeds {} bytes",
            slot.desc.label,
            slot.data.len()
        );
        slot.data[start..end].copy_from_slice(data);
        let label = slot.desc.label;
        self.pending.remove(&ResourceRef::Buffer(buffer));
        self.record(Command::UploadBuffer {
            label,
            offset,
            size: data.len() as u64,
        });
    }

    fn buffer_size(&self, buffer: BufferId) -> u64 {
        self.buffers[buffer].data.len() as u64
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.remove(buffer) {
            self.allocated -= slot.data.len() as u64;
            self.pending.remove(&ResourceRef::Buffer(buffer));
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        assert!(
            desc.width > 0 && desc.height > 0,
            "texture '{}' created with zero extent",
            desc.label
        );
        if desc.width.max(desc.height) > self.capabilities.max_texture_dimension {
            return Err(LumenError::MissingCapability("texture dimension"));
        }
        self.charge(desc.label, 0, desc.byte_size())?;
        Ok(self.textures.insert(TextureSlot {
            desc: desc.clone(),
            image: TexelImage::new(desc.width, desc.height, desc.layers()),
        }))
    }

    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> Result<()> {
        assert!(width > 0 && height > 0, "texture resized to zero extent");
        if width.max(height) > self.capabilities.max_texture_dimension {
            return Err(LumenError::MissingCapability("texture dimension"));
        }
        let (label, old, new) = {
            let slot = &self.textures[texture];
            let mut resized = slot.desc.clone();
            resized.width = width;
            resized.height = height;
            (slot.desc.label, slot.desc.byte_size(), resized.byte_size())
        };
        self.charge(label, old, new)?;

        let slot = &mut self.textures[texture];
        slot.desc.width = width;
        slot.desc.height = height;
        slot.image = TexelImage::new(width, height, slot.desc.layers());
        self.pending.remove(&ResourceRef::Texture(texture));
        debug!("Reallocated texture '{label}' at {width}x{height}");
        Ok(())
    }

    fn texture_desc(&self, texture: TextureId) -> &TextureDesc {
        &self.textures[texture].desc
    }

    fn clear_texture(&mut self, texture: TextureId, value: Vec4) {
        self.textures[texture].image.clear(value);
        self.pending.remove(&ResourceRef::Texture(texture));
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(slot) = self.textures.remove(texture) {
            self.allocated -= slot.desc.byte_size();
            self.pending.remove(&ResourceRef::Texture(texture));
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId> {
        if let ProgramStage::Compute { workgroup_size } = desc.stage
            && workgroup_size.contains(&0)
        {
            return Err(LumenError::ProgramCreation {
                label: desc.label,
                reason: "zero workgroup size".to_string(),
            });
        }
        debug!("Created program '{}'", desc.label);
        Ok(self.programs.insert(ProgramSlot {
            desc: desc.clone(),
            uniforms: FxHashMap::default(),
        }))
    }

    fn use_program(&mut self, program: ProgramId) {
        let label = self.programs[program].desc.label;
        self.current_program = Some(program);
        self.record(Command::UseProgram(label));
    }

    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue) {
        let slot = &mut self.programs[program];
        let Some(decl) = slot.desc.params.iter().find(|p| p.name == name) else {
            warn!(
                "Program '{}' has no parameter '{name}'; write ignored",
                slot.desc.label
            );
            return;
        };
        if decl.kind != value.kind() {
            warn!(
                "Parameter '{name}' of '{}' is {:?}, got {:?}; write ignored",
                slot.desc.label,
                decl.kind,
                value.kind()
            );
            return;
        }
        slot.uniforms.insert(decl.name, value);
    }

    fn dispatch(&mut self, bindings: &Bindings, groups: [u32; 3]) {
        assert!(
            self.render_pass.is_none(),
            "dispatch issued inside a render pass"
        );
        let program = self.current_program("dispatch");
        let (label, stage, reference) = {
            let p = &self.programs[program];
            (p.desc.label, p.desc.stage, p.desc.reference)
        };
        let ProgramStage::Compute { workgroup_size } = stage else {
            panic!("dispatch with graphics program '{label}'");
        };

        self.check_bindings(label, bindings);
        self.record(Command::Dispatch {
            program: label,
            groups,
        });

        if let Some(kernel) = reference {
            kernel(&mut Invocation {
                uniforms: &self.programs[program].uniforms,
                bindings,
                buffers: &mut self.buffers,
                textures: &mut self.textures,
                groups,
                workgroup_size,
            });
        }

        self.mark_writes(bindings);
    }

    fn memory_barrier(&mut self, flags: BarrierFlags) {
        for visible in self.pending.values_mut() {
            *visible |= flags;
        }
        self.record(Command::Barrier(flags));
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        assert!(
            self.render_pass.is_none(),
            "render pass '{}' begun inside another pass",
            desc.label
        );
        for color in &desc.color {
            match color.clear {
                Some(value) => self.clear_texture(color.texture, value),
                None => self.check_read(
                    desc.label,
                    ResourceRef::Texture(color.texture),
                    BarrierFlags::FRAMEBUFFER,
                ),
            }
        }
        if let Some(depth) = desc.depth {
            match (depth.clear, depth.layer) {
                (Some(d), Some(layer)) => {
                    self.textures[depth.texture]
                        .image
                        .clear_layer(layer, Vec4::splat(d));
                }
                (Some(d), None) => self.clear_texture(depth.texture, Vec4::splat(d)),
                (None, _) => self.check_read(
                    desc.label,
                    ResourceRef::Texture(depth.texture),
                    BarrierFlags::FRAMEBUFFER,
                ),
            }
        }
        self.record(Command::BeginRenderPass(desc.label));
        self.render_pass = Some(desc.clone());
    }

    fn draw_indexed_indirect(&mut self, bindings: &Bindings, draw: &IndirectDraw) {
        assert!(
            self.render_pass.is_some(),
            "draw issued outside a render pass"
        );
        let program = self.current_program("draw");
        let label = self.programs[program].desc.label;
        assert!(
            matches!(self.programs[program].desc.stage, ProgramStage::Graphics(_)),
            "draw with compute program '{label}'"
        );

        self.check_bindings(label, bindings);
        self.check_read(
            label,
            ResourceRef::Buffer(draw.indirect_buffer),
            BarrierFlags::COMMAND,
        );

        let commands: Vec<DrawCommand> = self.read_buffer(draw.indirect_buffer);
        assert!(
            draw.draw_count as usize <= commands.len(),
            "'{label}' draws {} commands from a buffer holding {}",
            draw.draw_count,
            commands.len()
        );
        let indices: Vec<u32> = self.read_buffer(draw.index_buffer);
        let vertex_count = self.element_count::<Vertex>(draw.vertex_buffer);

        let mut visible = 0;
        for (i, cmd) in commands[..draw.draw_count as usize].iter().enumerate() {
            if cmd.instance_count == 0 || cmd.index_count == 0 {
                continue;
            }
            visible += 1;
            let first = cmd.first_index as usize;
            let last = first + cmd.index_count as usize;
            assert!(
                last <= indices.len(),
                "draw command {i} of '{label}' reads indices {first}..{last} of {}",
                indices.len()
            );
            for &index in &indices[first..last] {
                let v = i64::from(cmd.base_vertex) + i64::from(index);
                assert!(
                    (0..vertex_count as i64).contains(&v),
                    "draw command {i} of '{label}' fetches vertex {v} of {vertex_count}"
                );
            }
        }

        self.record(Command::DrawIndexedIndirect {
            program: label,
            draw_count: draw.draw_count,
            visible,
        });
    }

    fn draw_arrays(&mut self, bindings: &Bindings, vertex_count: u32, instance_count: u32) {
        assert!(
            self.render_pass.is_some(),
            "draw issued outside a render pass"
        );
        let program = self.current_program("draw");
        let label = self.programs[program].desc.label;
        self.check_bindings(label, bindings);
        self.record(Command::DrawArrays {
            program: label,
            vertex_count,
            instance_count,
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pass) = self.render_pass.take() else {
            panic!("end_render_pass without an open pass");
        };
        for color in &pass.color {
            self.pending.remove(&ResourceRef::Texture(color.texture));
        }
        if let Some(depth) = pass.depth
            && !depth.read_only
        {
            self.pending.remove(&ResourceRef::Texture(depth.texture));
        }
        self.record(Command::EndRenderPass);
    }

    fn present(&mut self, texture: TextureId) {
        assert!(
            self.render_pass.is_none(),
            "present issued inside a render pass"
        );
        self.check_read(
            "present",
            ResourceRef::Texture(texture),
            BarrierFlags::TEXTURE_FETCH,
        );
        let label = self.textures[texture].desc.label;
        self.presented = Some(texture);
        self.frames_presented += 1;
        self.record(Command::Present(label));
    }
}

// ─── Kernel invocation ────────────────────────────────────────────────────────

/// View of one dispatch handed to a [`ReferenceKernel`](super::resources::ReferenceKernel).
///
/// Resources are addressed by binding slot. Accesses are bounds-checked;
/// reading a slot bound with the wrong resource kind panics.
pub struct Invocation<'a> {
    uniforms: &'a FxHashMap<&'static str, UniformValue>,
    bindings: &'a Bindings,
    buffers: &'a mut SlotMap<BufferId, BufferSlot>,
    textures: &'a mut SlotMap<TextureId, TextureSlot>,
    groups: [u32; 3],
    workgroup_size: [u32; 2],
}

impl Invocation<'_> {
    #[must_use]
    pub fn groups(&self) -> [u32; 3] {
        self.groups
    }

    /// Number of invocations along x and y.
    #[must_use]
    pub fn extent(&self) -> [u32; 2] {
        [
            self.groups[0] * self.workgroup_size[0],
            self.groups[1] * self.workgroup_size[1],
        ]
    }

    // --- Parameters ---

    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    #[must_use]
    pub fn f32(&self, name: &str) -> f32 {
        match self.uniform(name) {
            Some(UniformValue::F32(v)) => v,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn u32(&self, name: &str) -> u32 {
        match self.uniform(name) {
            Some(UniformValue::U32(v)) => v,
            _ => 0,
        }
    }

    #[must_use]
    pub fn i32(&self, name: &str) -> i32 {
        match self.uniform(name) {
            Some(UniformValue::I32(v)) => v,
            _ => 0,
        }
    }

    #[must_use]
    pub fn bool(&self, name: &str) -> bool {
        matches!(self.uniform(name), Some(UniformValue::Bool(true)))
    }

    #[must_use]
    pub fn vec3(&self, name: &str) -> Vec3 {
        match self.uniform(name) {
            Some(UniformValue::Vec3(v)) => v,
            _ => Vec3::ZERO,
        }
    }

    #[must_use]
    pub fn mat4(&self, name: &str) -> Mat4 {
        match self.uniform(name) {
            Some(UniformValue::Mat4(v)) => v,
            _ => Mat4::IDENTITY,
        }
    }

    // --- Buffers ---

    fn buffer_id(&self, slot: u32) -> (BufferId, bool) {
        match self.bindings.get(slot) {
            Some(Binding::StorageBuffer { buffer, writable }) => (*buffer, *writable),
            Some(Binding::UniformBuffer(buffer)) => (*buffer, false),
            other => panic!("slot {slot} is not a buffer binding: {other:?}"),
        }
    }

    /// The per-frame uniform block bound at the frame-state slot.
    #[must_use]
    pub fn frame_state(&self) -> FrameState {
        let (buffer, _) = self.buffer_id(FRAME_STATE_SLOT);
        let data = &self.buffers[buffer].data;
        bytemuck::pod_read_unaligned(&data[..size_of::<FrameState>()])
    }

    #[must_use]
    pub fn read_buffer<T: Pod>(&self, slot: u32) -> Vec<T> {
        let (buffer, _) = self.buffer_id(slot);
        bytemuck::pod_collect_to_vec(&self.buffers[buffer].data)
    }

    /// Overwrites the start of a writable storage buffer with `values`.
    pub fn write_buffer<T: Pod>(&mut self, slot: u32, values: &[T]) {
        let (buffer, writable) = self.buffer_id(slot);
        assert!(writable, "slot {slot} is bound read-only");
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let data = &mut self.buffers[buffer].data;
        assert!(
            bytes.len() <= data.len(),
            "kernel writes {} bytes into a {} byte buffer",
            bytes.len(),
            data.len()
        );
        data[..bytes.len()].copy_from_slice(bytes);
    }

    // --- Textures ---

    fn texture_id(&self, slot: u32) -> TextureId {
        match self.bindings.get(slot) {
            Some(Binding::Texture(t) | Binding::Image { texture: t, .. }) => *t,
            other => panic!("slot {slot} is not a texture binding: {other:?}"),
        }
    }

    #[must_use]
    pub fn texture(&self, slot: u32) -> &TexelImage {
        &self.textures[self.texture_id(slot)].image
    }

    #[must_use]
    pub fn image_size(&self, slot: u32) -> (u32, u32) {
        let image = self.texture(slot);
        (image.width(), image.height())
    }

    #[must_use]
    pub fn load(&self, slot: u32, x: u32, y: u32) -> Vec4 {
        self.texture(slot).load(x, y, 0)
    }

    #[must_use]
    pub fn sample(&self, slot: u32, uv: Vec2) -> Vec4 {
        self.texture(slot).sample(uv, 0)
    }

    #[must_use]
    pub fn sample_cube(&self, slot: u32, dir: Vec3) -> Vec4 {
        self.texture(slot).sample_cube(dir)
    }

    /// Writes one texel of a storage image.
    pub fn store(&mut self, slot: u32, x: u32, y: u32, value: Vec4) {
        self.store_layer(slot, x, y, 0, value);
    }

    pub fn store_layer(&mut self, slot: u32, x: u32, y: u32, layer: u32, value: Vec4) {
        let texture = match self.bindings.get(slot) {
            Some(Binding::Image { texture, access }) => {
                assert!(
                    *access != Access::ReadOnly,
                    "slot {slot} is a read-only image"
                );
                *texture
            }
            other => panic!("slot {slot} is not a storage image: {other:?}"),
        };
        self.textures[texture].image.store(x, y, layer, value);
    }
}
