//! Scene Batch
//!
//! [`SceneBatch`] owns the scene's geometry as five position-aligned global
//! arrays (draw commands, meshes, materials, vertices, indices) and their
//! GPU mirrors, so that the whole scene renders with a single indirect
//! multi-draw.
//!
//! # Merging
//!
//! [`SceneBatch::add`] appends transient [`Model`]s in input order and
//! rebases every cross-reference by the counts already present:
//!
//! ```text
//! draw_command.base_vertex  += vertices before this model
//! draw_command.first_index  += indices before this model
//! mesh.material_index       += materials before this model
//! ```
//!
//! Arrays only grow. After every merge all five buffers are re-uploaded in
//! full; scenes are loaded once, so there is no incremental append path.
//!
//! # Per-frame use
//!
//! [`cull`](SceneBatch::cull) must run before [`draw`](SceneBatch::draw) in
//! the same frame: it rewrites each command's instance count for the given
//! view-projection and is only valid for that frame.

mod cull;

use std::ops::Range;

use bytemuck::Pod;
use glam::Mat4;
use log::debug;

pub use cull::{CULL_WORKGROUP, aabb_in_frustum};

use crate::errors::Result;
use crate::renderer::core::{
    BarrierFlags, BufferDesc, BufferId, GpuDevice, IndirectDraw, ProgramId, RenderContext,
};
use crate::scene::model::{DrawCommand, Material, Mesh, Model, Vertex};
use crate::utils::ChangeTracker;

// Storage binding slots used by every program that reads the batch.
pub const DRAW_COMMAND_SLOT: u32 = 1;
pub const MESH_SLOT: u32 = 2;
pub const VERTEX_SLOT: u32 = 3;
pub const INDEX_SLOT: u32 = 4;
pub const MATERIAL_SLOT: u32 = 5;

/// A replacement value for one mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPatch {
    pub index: usize,
    pub value: Mesh,
}

pub struct SceneBatch {
    draw_commands: Vec<DrawCommand>,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,

    draw_command_buffer: BufferId,
    mesh_buffer: BufferId,
    material_buffer: BufferId,
    vertex_buffer: BufferId,
    index_buffer: BufferId,

    cull_program: ProgramId,

    /// Bumped on every merge. The path tracer observes it.
    geometry: ChangeTracker,
    /// Bumped on every mesh edit.
    transforms: ChangeTracker,
}

impl SceneBatch {
    pub fn new(device: &mut dyn GpuDevice) -> Result<Self> {
        use wgpu::BufferUsages as U;

        let draw_command_buffer =
            device.create_buffer(&BufferDesc::new("draw_commands", U::STORAGE | U::INDIRECT))?;
        let mesh_buffer = device.create_buffer(&BufferDesc::new("meshes", U::STORAGE))?;
        let material_buffer = device.create_buffer(&BufferDesc::new("materials", U::STORAGE))?;
        let vertex_buffer =
            device.create_buffer(&BufferDesc::new("vertices", U::VERTEX | U::STORAGE))?;
        let index_buffer =
            device.create_buffer(&BufferDesc::new("indices", U::INDEX | U::STORAGE))?;

        let cull_program = device.create_program(&cull::program())?;

        Ok(Self {
            draw_commands: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            draw_command_buffer,
            mesh_buffer,
            material_buffer,
            vertex_buffer,
            index_buffer,
            cull_program,
            geometry: ChangeTracker::new(),
            transforms: ChangeTracker::new(),
        })
    }

    /// Merges `models` into the batch and re-uploads every buffer.
    ///
    /// Ownership of the models moves into the batch. An empty list is a
    /// no-op.
    ///
    /// # Errors
    /// `OutOfMemory` when a buffer cannot grow. The CPU arrays are rolled
    /// back to their previous lengths; each GPU buffer still starts with the
    /// previous contents, so the batch keeps drawing what it held before.
    ///
    /// # Panics
    /// When a model's meshes and draw commands are not paired 1:1, or a
    /// model references vertices, indices or materials it does not own.
    /// Every model is checked before any is merged.
    pub fn add(&mut self, device: &mut dyn GpuDevice, models: Vec<Model>) -> Result<()> {
        if models.is_empty() {
            return Ok(());
        }
        models.iter().for_each(validate_model);
        let previous = self.lengths();

        self.draw_commands
            .reserve(models.iter().map(|m| m.draw_commands.len()).sum());
        self.meshes.reserve(models.iter().map(|m| m.meshes.len()).sum());
        self.materials
            .reserve(models.iter().map(|m| m.materials.len()).sum());
        self.vertices
            .reserve(models.iter().map(|m| m.vertices.len()).sum());
        self.indices.reserve(models.iter().map(|m| m.indices.len()).sum());

        for model in models {
            let base_vertex = self.vertices.len() as i32;
            let first_index = self.indices.len() as u32;
            let first_material = self.materials.len() as u32;

            self.draw_commands
                .extend(model.draw_commands.into_iter().map(|mut cmd| {
                    cmd.base_vertex += base_vertex;
                    cmd.first_index += first_index;
                    cmd
                }));
            self.meshes.extend(model.meshes.into_iter().map(|mut mesh| {
                mesh.material_index += first_material;
                mesh
            }));
            self.materials.extend(model.materials);
            self.vertices.extend(model.vertices);
            self.indices.extend(model.indices);
        }

        if let Err(err) = self.upload_all(device) {
            self.truncate(previous);
            return Err(err);
        }
        self.geometry.changed();

        debug!(
            "SceneBatch: {} meshes, {} materials, {} vertices, {} indices uploaded",
            self.meshes.len(),
            self.materials.len(),
            self.vertices.len(),
            self.indices.len()
        );
        Ok(())
    }

    fn lengths(&self) -> [usize; 5] {
        [
            self.draw_commands.len(),
            self.meshes.len(),
            self.materials.len(),
            self.vertices.len(),
            self.indices.len(),
        ]
    }

    fn truncate(&mut self, [draw_commands, meshes, materials, vertices, indices]: [usize; 5]) {
        self.draw_commands.truncate(draw_commands);
        self.meshes.truncate(meshes);
        self.materials.truncate(materials);
        self.vertices.truncate(vertices);
        self.indices.truncate(indices);
    }

    fn upload_all(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        device.allocate_buffer(
            self.draw_command_buffer,
            bytemuck::cast_slice(&self.draw_commands),
        )?;
        device.allocate_buffer(self.mesh_buffer, bytemuck::cast_slice(&self.meshes))?;
        device.allocate_buffer(self.material_buffer, bytemuck::cast_slice(&self.materials))?;
        device.allocate_buffer(self.vertex_buffer, bytemuck::cast_slice(&self.vertices))?;
        device.allocate_buffer(self.index_buffer, bytemuck::cast_slice(&self.indices))?;
        Ok(())
    }

    /// GPU visibility test: rewrites every command's instance count to 1
    /// (visible) or 0 (culled) for `view_projection`.
    pub fn cull(&self, ctx: &mut RenderContext<'_>, view_projection: Mat4) {
        if self.meshes.is_empty() {
            return;
        }
        let count = self.meshes.len() as u32;

        ctx.use_program(self.cull_program);
        let device = ctx.device();
        device.set_uniform(self.cull_program, "view_projection", view_projection.into());
        device.set_uniform(self.cull_program, "mesh_count", count.into());

        ctx.reset_bindings();
        ctx.bind_storage_buffer(DRAW_COMMAND_SLOT, self.draw_command_buffer, true);
        ctx.bind_storage_buffer(MESH_SLOT, self.mesh_buffer, false);
        ctx.dispatch(count.div_ceil(CULL_WORKGROUP), 1, 1);
        ctx.memory_barrier(BarrierFlags::COMMAND | BarrierFlags::SHADER_STORAGE);
    }

    /// Binds the batch buffers for the current graphics program.
    pub fn bind(&self, ctx: &mut RenderContext<'_>) {
        ctx.bind_storage_buffer(DRAW_COMMAND_SLOT, self.draw_command_buffer, false);
        ctx.bind_storage_buffer(MESH_SLOT, self.mesh_buffer, false);
        ctx.bind_storage_buffer(VERTEX_SLOT, self.vertex_buffer, false);
        ctx.bind_storage_buffer(INDEX_SLOT, self.index_buffer, false);
        ctx.bind_storage_buffer(MATERIAL_SLOT, self.material_buffer, false);
    }

    /// One indirect multi-draw over every command, using the instance counts
    /// written by the preceding [`cull`](Self::cull).
    pub fn draw(&self, ctx: &mut RenderContext<'_>) {
        if self.meshes.is_empty() {
            return;
        }
        self.bind(ctx);
        ctx.draw_indexed_indirect(&IndirectDraw {
            vertex_buffer: self.vertex_buffer,
            index_buffer: self.index_buffer,
            indirect_buffer: self.draw_command_buffer,
            draw_count: self.meshes.len() as u32,
        });
    }

    /// Mutates `meshes[start..start + count]` and uploads only that range.
    ///
    /// # Panics
    /// When the range is not inside the mesh array.
    pub fn for_each_mesh<F>(&mut self, device: &mut dyn GpuDevice, start: usize, count: usize, f: F)
    where
        F: FnMut(&mut Mesh),
    {
        let range = checked_range(start, count, self.meshes.len(), "mesh");
        self.meshes[range.clone()].iter_mut().for_each(f);
        upload_range(device, self.mesh_buffer, &self.meshes, range);
        self.transforms.changed();
    }

    /// Mutates `draw_commands[start..start + count]` and uploads only that
    /// range.
    ///
    /// # Panics
    /// When the range is not inside the draw-command array.
    pub fn for_each_draw_command<F>(
        &mut self,
        device: &mut dyn GpuDevice,
        start: usize,
        count: usize,
        f: F,
    ) where
        F: FnMut(&mut DrawCommand),
    {
        let range = checked_range(start, count, self.draw_commands.len(), "draw command");
        self.draw_commands[range.clone()].iter_mut().for_each(f);
        upload_range(device, self.draw_command_buffer, &self.draw_commands, range);
    }

    /// Replaces individual meshes. Every index is validated before anything
    /// is written; the smallest range covering all patches is uploaded once.
    ///
    /// # Panics
    /// When any patch index is out of range.
    pub fn apply_mesh_patches(&mut self, device: &mut dyn GpuDevice, patches: &[MeshPatch]) {
        let len = self.meshes.len();
        if let Some(bad) = patches.iter().find(|p| p.index >= len) {
            panic!("mesh patch index {} out of range for {len} meshes", bad.index);
        }
        let Some(lo) = patches.iter().map(|p| p.index).min() else {
            return;
        };
        let hi = patches.iter().map(|p| p.index).max().unwrap_or(lo);

        for patch in patches {
            self.meshes[patch.index] = patch.value;
        }
        upload_range(device, self.mesh_buffer, &self.meshes, lo..hi + 1);
        self.transforms.changed();
    }

    // --- Accessors ---

    #[must_use]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    #[must_use]
    pub fn draw_commands(&self) -> &[DrawCommand] {
        &self.draw_commands
    }

    #[must_use]
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    #[must_use]
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    #[must_use]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[must_use]
    pub fn draw_command_buffer(&self) -> BufferId {
        self.draw_command_buffer
    }

    #[must_use]
    pub fn mesh_buffer(&self) -> BufferId {
        self.mesh_buffer
    }

    #[must_use]
    pub fn material_buffer(&self) -> BufferId {
        self.material_buffer
    }

    #[must_use]
    pub fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    #[must_use]
    pub fn index_buffer(&self) -> BufferId {
        self.index_buffer
    }

    #[must_use]
    pub fn geometry_version(&self) -> u64 {
        self.geometry.version()
    }

    #[must_use]
    pub fn transform_version(&self) -> u64 {
        self.transforms.version()
    }
}

fn validate_model(model: &Model) {
    assert_eq!(
        model.meshes.len(),
        model.draw_commands.len(),
        "model meshes and draw commands must pair 1:1"
    );
    let material_count = model.materials.len();
    for (i, (mesh, cmd)) in model.meshes.iter().zip(&model.draw_commands).enumerate() {
        assert!(
            (mesh.material_index as usize) < material_count,
            "mesh {i} references material {} of {material_count}",
            mesh.material_index
        );
        let index_end = cmd.first_index as usize + cmd.index_count as usize;
        assert!(
            index_end <= model.indices.len(),
            "draw command {i} reads indices up to {index_end} of {}",
            model.indices.len()
        );
        let vertex_count = model.vertices.len();
        assert!(
            cmd.base_vertex >= 0
                && (cmd.base_vertex as usize) <= vertex_count
                && (cmd.index_count == 0 || (cmd.base_vertex as usize) < vertex_count),
            "draw command {i} has base vertex {} outside {vertex_count} vertices",
            cmd.base_vertex
        );
        let base = cmd.base_vertex as usize;
        if let Some(&index) = model.indices[cmd.first_index as usize..index_end]
            .iter()
            .find(|&&index| base + index as usize >= vertex_count)
        {
            panic!(
                "draw command {i} reads vertex {} outside {vertex_count} vertices",
                base + index as usize
            );
        }
    }
}

fn checked_range(start: usize, count: usize, len: usize, what: &str) -> Range<usize> {
    let end = start.checked_add(count);
    assert!(
        end.is_some_and(|end| end <= len),
        "{what} range {start}+{count} out of bounds for length {len}"
    );
    start..start + count
}

fn upload_range<T: Pod>(device: &mut dyn GpuDevice, buffer: BufferId, items: &[T], range: Range<usize>) {
    if range.is_empty() {
        return;
    }
    let offset = (range.start * size_of::<T>()) as u64;
    debug!("Sub-range upload of {} elements at byte {offset}", range.len());
    device.write_buffer(buffer, offset, bytemuck::cast_slice(&items[range]));
}
