//! GPU resource descriptors and handles
//!
//! Backend-independent vocabulary shared by every [`GpuDevice`](super::GpuDevice)
//! implementation: typed ids, allocation descriptors, program descriptions,
//! slot bindings and barrier flags.

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use super::headless::Invocation;

slotmap::new_key_type! {
    /// Handle to a device buffer.
    pub struct BufferId;
    /// Handle to a device texture.
    pub struct TextureId;
    /// Handle to a compiled compute or graphics program.
    pub struct ProgramId;
}

// ─── Buffers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

impl BufferDesc {
    #[must_use]
    pub fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            size: 0,
            usage: usage | wgpu::BufferUsages::COPY_DST,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

// ─── Textures ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    D2,
    /// Six square layers.
    Cube,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub kind: TextureKind,
}

impl TextureDesc {
    #[must_use]
    pub fn d2(label: &'static str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            kind: TextureKind::D2,
        }
    }

    #[must_use]
    pub fn cube(label: &'static str, size: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label,
            width: size,
            height: size,
            format,
            kind: TextureKind::Cube,
        }
    }

    #[inline]
    #[must_use]
    pub fn layers(&self) -> u32 {
        match self.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of bytes a full allocation of this texture occupies.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width)
            * u64::from(self.height)
            * u64::from(self.layers())
            * bytes_per_texel(self.format)
    }
}

/// Storage size of one texel for the formats used by the pipeline.
#[must_use]
pub fn bytes_per_texel(format: wgpu::TextureFormat) -> u64 {
    use wgpu::TextureFormat as F;
    match format {
        F::R8Unorm => 1,
        F::R16Float => 2,
        F::R32Float | F::R32Uint | F::Depth32Float | F::Rgba8Unorm | F::Rgba8Snorm => 4,
        F::Rgba16Float | F::Rg32Float => 8,
        _ => 16,
    }
}

// ─── Programs ─────────────────────────────────────────────────────────────────

/// Scalar / vector / matrix value written into a program parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

/// Type of a declared program parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    F32,
    I32,
    U32,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    /// (size, alignment) in a std140-style uniform block.
    #[must_use]
    pub fn layout(self) -> (u64, u64) {
        match self {
            Self::F32 | Self::I32 | Self::U32 | Self::Bool => (4, 4),
            Self::Vec2 => (8, 8),
            Self::Vec3 => (12, 16),
            Self::Vec4 => (16, 16),
            Self::Mat4 => (64, 16),
        }
    }
}

impl UniformValue {
    #[must_use]
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::F32(_) => UniformKind::F32,
            Self::I32(_) => UniformKind::I32,
            Self::U32(_) => UniformKind::U32,
            Self::Bool(_) => UniformKind::Bool,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Mat4(_) => UniformKind::Mat4,
        }
    }

    /// Raw bytes as laid out in a uniform block.
    #[must_use]
    pub fn to_bytes(&self) -> SmallVec<[u8; 64]> {
        let mut out = SmallVec::new();
        match self {
            Self::F32(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::I32(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::U32(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Bool(v) => out.extend_from_slice(bytemuck::bytes_of(&u32::from(*v))),
            Self::Vec2(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Vec3(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Vec4(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Mat4(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
        }
        out
    }
}

macro_rules! impl_uniform_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_uniform_from!(
    f32 => F32,
    i32 => I32,
    u32 => U32,
    bool => Bool,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat4 => Mat4,
);

/// A named program parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: &'static str,
    pub kind: UniformKind,
}

impl ParamDecl {
    #[must_use]
    pub const fn new(name: &'static str, kind: UniformKind) -> Self {
        Self { name, kind }
    }
}

/// Vertex input consumed by a graphics program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInput {
    /// No vertex buffer; vertices are generated or fetched from storage.
    None,
    /// The batch vertex layout ([`Vertex`](crate::scene::model::Vertex)).
    SceneVertex,
}

/// Fixed-function state of a graphics program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsState {
    pub color_formats: &'static [wgpu::TextureFormat],
    pub depth_format: Option<wgpu::TextureFormat>,
    pub depth_write: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub alpha_blend: bool,
    pub topology: wgpu::PrimitiveTopology,
    pub vertex_input: VertexInput,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgramStage {
    Compute { workgroup_size: [u32; 2] },
    Graphics(GraphicsState),
}

/// CPU emulation of a compute program, executed by the headless device.
pub type ReferenceKernel = fn(&mut Invocation<'_>);

/// Everything a backend needs to build a program.
///
/// Shader text is resolved by the backend from `label`.
#[derive(Clone)]
pub struct ProgramDesc {
    pub label: &'static str,
    pub stage: ProgramStage,
    pub params: &'static [ParamDecl],
    pub reference: Option<ReferenceKernel>,
}

impl std::fmt::Debug for ProgramDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramDesc")
            .field("label", &self.label)
            .field("stage", &self.stage)
            .field("params", &self.params)
            .field("reference", &self.reference.is_some())
            .finish()
    }
}

impl ProgramDesc {
    #[must_use]
    pub fn compute(label: &'static str, workgroup_size: [u32; 2]) -> Self {
        Self {
            label,
            stage: ProgramStage::Compute { workgroup_size },
            params: &[],
            reference: None,
        }
    }

    #[must_use]
    pub fn graphics(label: &'static str, state: GraphicsState) -> Self {
        Self {
            label,
            stage: ProgramStage::Graphics(state),
            params: &[],
            reference: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: &'static [ParamDecl]) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_reference(mut self, kernel: ReferenceKernel) -> Self {
        self.reference = Some(kernel);
        self
    }
}

/// Number of workgroups needed to cover `extent` items with tiles of `tile`.
#[inline]
#[must_use]
pub fn group_count(extent: u32, tile: u32) -> u32 {
    extent.div_ceil(tile)
}

// ─── Bindings ─────────────────────────────────────────────────────────────────

/// Slot the per-frame uniform block is bound to for every program.
pub const FRAME_STATE_SLOT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    #[inline]
    #[must_use]
    pub fn writes(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }

    #[inline]
    #[must_use]
    pub fn reads(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }
}

/// A resource attached to a numbered binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Sampled texture (texture fetch).
    Texture(TextureId),
    /// Storage image (load / store).
    Image { texture: TextureId, access: Access },
    StorageBuffer { buffer: BufferId, writable: bool },
    UniformBuffer(BufferId),
}

/// Slot → resource table consumed by dispatches and draws.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    slots: SmallVec<[(u32, Binding); 12]>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, slot: u32, binding: Binding) {
        if let Some(entry) = self.slots.iter_mut().find(|(s, _)| *s == slot) {
            entry.1 = binding;
        } else {
            self.slots.push((slot, binding));
        }
    }

    pub fn unset(&mut self, slot: u32) {
        self.slots.retain(|(s, _)| *s != slot);
    }

    /// Drops every slot except `keep`.
    pub fn retain_only(&mut self, keep: u32) {
        self.slots.retain(|(s, _)| *s == keep);
    }

    #[must_use]
    pub fn get(&self, slot: u32) -> Option<&Binding> {
        self.slots.iter().find(|(s, _)| *s == slot).map(|(_, b)| b)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Binding)> {
        self.slots.iter().map(|(s, b)| (*s, b))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

bitflags! {
    /// Memory barrier scopes, named after the *consumer* access that must
    /// observe the preceding writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierFlags: u32 {
        /// Indirect command reads.
        const COMMAND             = 1 << 0;
        /// Sampled texture reads.
        const TEXTURE_FETCH       = 1 << 1;
        /// Storage image loads / stores.
        const SHADER_IMAGE_ACCESS = 1 << 2;
        /// Storage buffer reads / writes.
        const SHADER_STORAGE      = 1 << 3;
        /// Uniform buffer reads.
        const UNIFORM             = 1 << 4;
        /// Render target reads / writes.
        const FRAMEBUFFER         = 1 << 5;
    }
}

// ─── Render passes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub texture: TextureId,
    /// `None` keeps the existing contents.
    pub clear: Option<Vec4>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub texture: TextureId,
    pub clear: Option<f32>,
    /// Depth test only, no depth writes.
    pub read_only: bool,
    /// Cube face / array layer to render into.
    pub layer: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    pub label: &'static str,
    pub color: SmallVec<[ColorAttachment; 4]>,
    pub depth: Option<DepthAttachment>,
}

impl RenderPassDesc {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            color: SmallVec::new(),
            depth: None,
        }
    }

    #[must_use]
    pub fn with_color(mut self, texture: TextureId, clear: Option<Vec4>) -> Self {
        self.color.push(ColorAttachment { texture, clear });
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: DepthAttachment) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// Geometry consumed by one indirect multi-draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectDraw {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub indirect_buffer: BufferId,
    pub draw_count: u32,
}
