//! Per-mesh frustum culling program.
//!
//! One invocation per mesh, workgroups of [`CULL_WORKGROUP`]. Each mesh's
//! local bounding box is projected by `view_projection * model`; the mesh is
//! rejected when all eight corners lie outside the same clip plane.
//!
//! # Data flow
//! ```text
//! meshes (slot 2) ──► cull ──► draw_commands[i].instance_count (slot 1)
//! ```

use glam::{Mat4, Vec3, Vec4};

use super::{DRAW_COMMAND_SLOT, MESH_SLOT};
use crate::renderer::core::headless::Invocation;
use crate::renderer::core::resources::{ParamDecl, ProgramDesc, UniformKind};
use crate::scene::model::{DrawCommand, Mesh};

pub const CULL_WORKGROUP: u32 = 32;

pub(super) const PARAMS: &[ParamDecl] = &[
    ParamDecl::new("view_projection", UniformKind::Mat4),
    ParamDecl::new("mesh_count", UniformKind::U32),
];

pub(super) fn program() -> ProgramDesc {
    ProgramDesc::compute("scene_cull", [CULL_WORKGROUP, 1])
        .with_params(PARAMS)
        .with_reference(cull_kernel)
}

/// Conservative clip-space box test (`0 <= z <= w` depth range).
#[must_use]
pub fn aabb_in_frustum(clip_from_local: Mat4, min: Vec3, max: Vec3) -> bool {
    let corners = [
        Vec3::new(min.x, min.y, min.z),
        Vec3::new(max.x, min.y, min.z),
        Vec3::new(min.x, max.y, min.z),
        Vec3::new(max.x, max.y, min.z),
        Vec3::new(min.x, min.y, max.z),
        Vec3::new(max.x, min.y, max.z),
        Vec3::new(min.x, max.y, max.z),
        Vec3::new(max.x, max.y, max.z),
    ]
    .map(|c| clip_from_local * c.extend(1.0));

    let outside = |test: fn(Vec4) -> bool| corners.iter().all(|&c| test(c));

    !(outside(|c| c.x < -c.w)
        || outside(|c| c.x > c.w)
        || outside(|c| c.y < -c.w)
        || outside(|c| c.y > c.w)
        || outside(|c| c.z < 0.0)
        || outside(|c| c.z > c.w))
}

fn cull_kernel(inv: &mut Invocation<'_>) {
    let view_projection = inv.mat4("view_projection");
    let mesh_count = inv.u32("mesh_count") as usize;
    let meshes: Vec<Mesh> = inv.read_buffer(MESH_SLOT);
    let mut commands: Vec<DrawCommand> = inv.read_buffer(DRAW_COMMAND_SLOT);

    let invocations = inv.extent()[0] as usize;
    for i in 0..mesh_count.min(invocations) {
        let mesh = &meshes[i];
        let visible =
            aabb_in_frustum(view_projection * mesh.model, mesh.aabb_min, mesh.aabb_max);
        commands[i].instance_count = u32::from(visible);
    }

    inv.write_buffer(DRAW_COMMAND_SLOT, &commands);
}
