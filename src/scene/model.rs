//! Geometry Data Model
//!
//! GPU-layout records shared by the asset loader, [`SceneBatch`] and the
//! shader programs, plus the transient [`Model`] container a loader hands
//! over.
//!
//! All records are `#[repr(C)]` [`Pod`] types uploaded byte-for-byte. Their
//! padding follows std430 rules so the same arrays can be bound as storage
//! buffers.
//!
//! [`SceneBatch`]: crate::renderer::scene_batch::SceneBatch

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// One vertex of the shared vertex buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub _pad0: f32,
    pub tex_coord: Vec2,
    pub _pad1: [f32; 2],
    pub normal: Vec3,
    pub _pad2: f32,
    pub tangent: Vec3,
    pub _pad3: f32,
    pub bitangent: Vec3,
    pub _pad4: f32,
}

impl Vertex {
    #[must_use]
    pub fn new(position: Vec3, tex_coord: Vec2, normal: Vec3) -> Self {
        let tangent = normal.any_orthonormal_vector();
        Self {
            position,
            tex_coord,
            normal,
            tangent,
            bitangent: normal.cross(tangent),
            ..Self::zeroed()
        }
    }
}

/// Per-object record. Its array position is the object's identity.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Mesh {
    /// Local-to-world transform.
    pub model: Mat4,
    /// Local-space bounding box, used by culling.
    pub aabb_min: Vec3,
    /// Index into the batch material array.
    pub material_index: u32,
    pub aabb_max: Vec3,
    pub _pad: u32,
}

impl Mesh {
    #[must_use]
    pub fn new(model: Mat4, aabb_min: Vec3, aabb_max: Vec3, material_index: u32) -> Self {
        Self {
            model,
            aabb_min,
            material_index,
            aabb_max,
            _pad: 0,
        }
    }

    /// The eight corners of the local bounding box.
    #[must_use]
    pub fn aabb_corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.aabb_min, self.aabb_max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// World-space bounding box of the transformed local box.
    #[must_use]
    pub fn world_aabb(&self) -> (Vec3, Vec3) {
        self.aabb_corners().iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(lo, hi), c| {
                let p = self.model.transform_point3(*c);
                (lo.min(p), hi.max(p))
            },
        )
    }
}

/// Shading parameters referenced by [`Mesh::material_index`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub specular: f32,
    /// Bindless texture slots; `u32::MAX` means none.
    pub albedo_map: u32,
    pub normal_map: u32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            roughness: 0.5,
            metallic: 0.0,
            specular: 0.5,
            albedo_map: u32::MAX,
            normal_map: u32::MAX,
        }
    }
}

/// Indexed indirect draw record, laid out as the GPU consumes it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawCommand {
    pub index_count: u32,
    /// 1 when visible, 0 when culled.
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
}

/// Geometry of one loaded asset, indexed locally.
///
/// `meshes[i]` is drawn by `draw_commands[i]`; offsets and material indices
/// refer to this model's own arrays until [`SceneBatch::add`] rebases them.
///
/// [`SceneBatch::add`]: crate::renderer::scene_batch::SceneBatch::add
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub draw_commands: Vec<DrawCommand>,
}

impl Model {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one mesh with its own vertices, indices and material.
    ///
    /// The bounding box is computed from `vertices`; the transform starts
    /// as identity. Returns the local mesh index.
    pub fn push_mesh(&mut self, vertices: &[Vertex], indices: &[u32], material: Material) -> usize {
        let (aabb_min, aabb_max) = vertices.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(lo, hi), v| (lo.min(v.position), hi.max(v.position)),
        );
        let (aabb_min, aabb_max) = if vertices.is_empty() {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            (aabb_min, aabb_max)
        };

        let mesh_index = self.meshes.len();
        self.draw_commands.push(DrawCommand {
            index_count: indices.len() as u32,
            instance_count: 1,
            first_index: self.indices.len() as u32,
            base_vertex: self.vertices.len() as i32,
            base_instance: 0,
        });
        self.meshes.push(Mesh::new(
            Mat4::IDENTITY,
            aabb_min,
            aabb_max,
            self.materials.len() as u32,
        ));
        self.materials.push(material);
        self.vertices.extend_from_slice(vertices);
        self.indices.extend_from_slice(indices);
        mesh_index
    }

    /// Sets the transform of every mesh.
    pub fn set_transform(&mut self, transform: Mat4) {
        for mesh in &mut self.meshes {
            mesh.model = transform;
        }
    }
}
