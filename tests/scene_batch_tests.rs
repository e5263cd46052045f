//! Scene Batch Tests
//!
//! Tests for:
//! - Merging models: array concatenation and offset rebasing
//! - Full re-upload after every merge
//! - Ranged mesh / draw-command edits and their sub-range uploads
//! - Mesh patches
//! - GPU frustum culling (reference kernel) and the indirect draw

use std::panic::{AssertUnwindSafe, catch_unwind};

use glam::{Mat4, Vec2, Vec3};

use lumen::renderer::core::{
    BufferDesc, BufferId, Command, GpuDevice, GraphicsState, HeadlessDevice, ProgramDesc,
    RenderContext, RenderPassDesc, VertexInput,
};
use lumen::renderer::scene_batch::aabb_in_frustum;
use lumen::{DrawCommand, FrameState, Material, Mesh, MeshPatch, Model, SceneBatch, Vertex};

// ============================================================================
// Helpers
// ============================================================================

/// One-mesh model with `vertex_count` vertices along x at depth `z`.
fn strip_model(vertex_count: usize, index_count: usize, z: f32) -> Model {
    let vertices: Vec<Vertex> = (0..vertex_count)
        .map(|i| Vertex::new(Vec3::new(i as f32 * 0.1, 0.0, z), Vec2::ZERO, Vec3::Z))
        .collect();
    let indices: Vec<u32> = (0..index_count).map(|i| (i % vertex_count) as u32).collect();
    let mut model = Model::new();
    model.push_mesh(&vertices, &indices, Material::default());
    model
}

fn frame_buffer(device: &mut HeadlessDevice) -> BufferId {
    let buffer = device
        .create_buffer(
            &BufferDesc::new("frame_state", wgpu::BufferUsages::UNIFORM)
                .with_size(size_of::<FrameState>() as u64),
        )
        .unwrap();
    device.write_buffer(buffer, 0, bytemuck::bytes_of(&FrameState::default()));
    buffer
}

fn camera_view_projection() -> Mat4 {
    let projection = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
    projection * view
}

fn batch_with(device: &mut HeadlessDevice, models: Vec<Model>) -> SceneBatch {
    let mut batch = SceneBatch::new(device).unwrap();
    batch.add(device, models).unwrap();
    batch
}

// ============================================================================
// Merge Tests
// ============================================================================

#[test]
fn merge_concatenates_and_rebases_offsets() {
    let mut device = HeadlessDevice::new();
    let a = strip_model(10, 6, -5.0);
    let b = strip_model(15, 9, -5.0);
    let b_indices = b.indices.clone();

    let batch = batch_with(&mut device, vec![a, b]);

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.vertices().len(), 25);
    assert_eq!(batch.indices().len(), 15);
    assert_eq!(batch.materials().len(), 2);

    let cmds = batch.draw_commands();
    assert_eq!((cmds[0].base_vertex, cmds[0].first_index), (0, 0));
    assert_eq!((cmds[1].base_vertex, cmds[1].first_index), (10, 6));
    assert_eq!(cmds[1].index_count, 9);

    assert_eq!(batch.meshes()[0].material_index, 0);
    assert_eq!(batch.meshes()[1].material_index, 1);

    // Index values are local to their mesh and stay untouched
    assert_eq!(&batch.indices()[6..], b_indices.as_slice());
}

#[test]
fn merge_preserves_order_across_calls() {
    let mut device = HeadlessDevice::new();
    let mut batch = SceneBatch::new(&mut device).unwrap();

    batch.add(&mut device, vec![strip_model(4, 3, -1.0)]).unwrap();
    batch
        .add(&mut device, vec![strip_model(5, 6, -2.0), strip_model(6, 3, -3.0)])
        .unwrap();

    let base_vertices: Vec<i32> = batch.draw_commands().iter().map(|c| c.base_vertex).collect();
    let first_indices: Vec<u32> = batch.draw_commands().iter().map(|c| c.first_index).collect();
    assert_eq!(base_vertices, vec![0, 4, 9]);
    assert_eq!(first_indices, vec![0, 3, 9]);

    let depths: Vec<f32> = batch.meshes().iter().map(|m| m.aabb_min.z).collect();
    assert_eq!(depths, vec![-1.0, -2.0, -3.0]);
}

#[test]
fn merge_rebases_multi_mesh_model() {
    let mut device = HeadlessDevice::new();
    let tri = [
        Vertex::new(Vec3::ZERO, Vec2::ZERO, Vec3::Z),
        Vertex::new(Vec3::X, Vec2::X, Vec3::Z),
        Vertex::new(Vec3::Y, Vec2::Y, Vec3::Z),
    ];
    let mut model = Model::new();
    model.push_mesh(&tri, &[0, 1, 2], Material::default());
    model.push_mesh(&tri, &[0, 2, 1], Material::default());

    let batch = batch_with(&mut device, vec![strip_model(7, 3, -1.0), model]);

    let cmds = batch.draw_commands();
    assert_eq!(cmds[1].base_vertex, 7);
    assert_eq!(cmds[2].base_vertex, 10);
    assert_eq!(cmds[2].first_index, 6);
    assert_eq!(batch.meshes()[2].material_index, 2);
}

#[test]
fn merge_copies_base_instance_verbatim() {
    let mut device = HeadlessDevice::new();
    let mut model = strip_model(3, 3, -1.0);
    model.draw_commands[0].base_instance = 42;

    let batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0), model]);
    assert_eq!(batch.draw_commands()[1].base_instance, 42);
}

#[test]
fn merge_uploads_every_buffer_in_full() {
    let mut device = HeadlessDevice::new();
    let batch = batch_with(
        &mut device,
        vec![strip_model(10, 6, -5.0), strip_model(15, 9, -5.0)],
    );

    assert_eq!(
        device.buffer_bytes(batch.draw_command_buffer()),
        bytemuck::cast_slice::<DrawCommand, u8>(batch.draw_commands())
    );
    assert_eq!(
        device.buffer_bytes(batch.mesh_buffer()),
        bytemuck::cast_slice::<Mesh, u8>(batch.meshes())
    );
    assert_eq!(
        device.buffer_bytes(batch.material_buffer()),
        bytemuck::cast_slice::<Material, u8>(batch.materials())
    );
    assert_eq!(
        device.buffer_bytes(batch.vertex_buffer()),
        bytemuck::cast_slice::<Vertex, u8>(batch.vertices())
    );
    assert_eq!(
        device.read_buffer::<u32>(batch.index_buffer()),
        batch.indices().to_vec()
    );

    let allocations = device
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::AllocateBuffer { .. }))
        .count();
    assert_eq!(allocations, 5);
}

#[test]
fn add_empty_list_is_noop() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0)]);
    let version = batch.geometry_version();
    device.take_commands();

    batch.add(&mut device, Vec::new()).unwrap();

    assert_eq!(batch.geometry_version(), version);
    assert!(device.commands().is_empty());
}

#[test]
fn add_bumps_geometry_version() {
    let mut device = HeadlessDevice::new();
    let mut batch = SceneBatch::new(&mut device).unwrap();
    let before = batch.geometry_version();

    batch.add(&mut device, vec![strip_model(3, 3, -1.0)]).unwrap();
    assert_ne!(batch.geometry_version(), before);
    assert_eq!(batch.transform_version(), 0);
}

#[test]
#[should_panic(expected = "pair 1:1")]
fn add_rejects_unpaired_meshes() {
    let mut device = HeadlessDevice::new();
    let mut model = strip_model(3, 3, -1.0);
    model.draw_commands.clear();
    let mut batch = SceneBatch::new(&mut device).unwrap();
    let _ = batch.add(&mut device, vec![model]);
}

#[test]
#[should_panic(expected = "base vertex 10 outside 10 vertices")]
fn add_rejects_base_vertex_past_own_vertices() {
    let mut device = HeadlessDevice::new();
    let mut a = strip_model(10, 6, -1.0);
    a.draw_commands[0].base_vertex = 10;
    let b = strip_model(15, 9, -2.0);
    let mut batch = SceneBatch::new(&mut device).unwrap();
    let _ = batch.add(&mut device, vec![a, b]);
}

#[test]
#[should_panic(expected = "reads vertex 12 outside 10 vertices")]
fn add_rejects_index_past_own_vertices() {
    let mut device = HeadlessDevice::new();
    let mut a = strip_model(10, 6, -1.0);
    a.indices[4] = 12;
    let b = strip_model(15, 9, -2.0);
    let mut batch = SceneBatch::new(&mut device).unwrap();
    let _ = batch.add(&mut device, vec![a, b]);
}

#[test]
#[should_panic(expected = "reads vertex 10 outside 10 vertices")]
fn add_rejects_index_shifted_past_own_vertices() {
    let mut device = HeadlessDevice::new();
    let mut a = strip_model(10, 6, -1.0);
    a.draw_commands[0].base_vertex = 5;
    a.indices[0] = 5;
    let mut batch = SceneBatch::new(&mut device).unwrap();
    let _ = batch.add(&mut device, vec![a]);
}

#[test]
fn add_accepts_empty_mesh_at_vertex_end() {
    let mut device = HeadlessDevice::new();
    let mut model = strip_model(4, 6, -1.0);
    model.push_mesh(&[], &[], Material::default());
    assert_eq!(model.draw_commands[1].base_vertex, 4);

    let batch = batch_with(&mut device, vec![model]);

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.draw_commands()[1].index_count, 0);
}

#[test]
fn add_fails_when_out_of_memory() {
    let mut device = HeadlessDevice::new().with_memory_budget(256);
    let mut batch = SceneBatch::new(&mut device).unwrap();

    let result = batch.add(&mut device, vec![strip_model(64, 64, -1.0)]);
    assert!(matches!(result, Err(lumen::LumenError::OutOfMemory { .. })));
}

#[test]
fn failed_add_keeps_previous_contents() {
    let mut device = HeadlessDevice::new().with_memory_budget(2048);
    let mut batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0)]);
    let version = batch.geometry_version();

    // Draw commands, meshes and materials grow; the vertex buffer does not fit
    let result = batch.add(&mut device, vec![strip_model(64, 64, -2.0)]);
    assert!(matches!(result, Err(lumen::LumenError::OutOfMemory { .. })));

    assert_eq!(batch.len(), 1);
    assert_eq!(batch.vertices().len(), 3);
    assert_eq!(batch.indices().len(), 3);
    assert_eq!(batch.materials().len(), 1);
    assert_eq!(batch.geometry_version(), version);
    assert_eq!(
        device.buffer_size(batch.vertex_buffer()),
        (3 * size_of::<Vertex>()) as u64
    );
    assert!(
        device.buffer_size(batch.draw_command_buffer())
            >= size_of_val(batch.draw_commands()) as u64
    );

    batch.add(&mut device, vec![strip_model(3, 3, -2.0)]).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.draw_commands()[1].base_vertex, 3);
}

#[test]
fn invalid_model_is_rejected_before_merging() {
    let mut device = HeadlessDevice::new();
    let mut bad = strip_model(3, 3, -2.0);
    bad.meshes.clear();
    let mut batch = SceneBatch::new(&mut device).unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| {
        batch.add(&mut device, vec![strip_model(3, 3, -1.0), bad])
    }));

    assert!(result.is_err());
    assert!(batch.is_empty());
    assert!(batch.vertices().is_empty());
}

// ============================================================================
// Ranged Edit Tests
// ============================================================================

#[test]
fn for_each_mesh_uploads_only_the_range() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(
        &mut device,
        vec![
            strip_model(3, 3, -1.0),
            strip_model(3, 3, -2.0),
            strip_model(3, 3, -3.0),
        ],
    );
    let before = device.buffer_bytes(batch.mesh_buffer()).to_vec();
    device.take_commands();

    let moved = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
    batch.for_each_mesh(&mut device, 1, 1, |mesh| mesh.model = moved);

    let stride = size_of::<Mesh>();
    assert_eq!(
        device.commands(),
        &[Command::UploadBuffer {
            label: "meshes",
            offset: stride as u64,
            size: stride as u64,
        }]
    );

    let after = device.buffer_bytes(batch.mesh_buffer());
    assert_eq!(&after[..stride], &before[..stride]);
    assert_eq!(&after[2 * stride..], &before[2 * stride..]);
    assert_eq!(device.read_buffer::<Mesh>(batch.mesh_buffer())[1].model, moved);
    assert_eq!(batch.meshes()[1].model, moved);
}

#[test]
fn for_each_mesh_bumps_transform_version() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0)]);
    let geometry = batch.geometry_version();

    batch.for_each_mesh(&mut device, 0, 1, |_| {});

    assert_eq!(batch.transform_version(), 1);
    assert_eq!(batch.geometry_version(), geometry);
}

#[test]
fn for_each_mesh_empty_range_at_end_is_allowed() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0)]);
    device.take_commands();

    batch.for_each_mesh(&mut device, 1, 0, |_| unreachable!());
    assert!(device.commands().is_empty());
}

#[test]
#[should_panic(expected = "out of bounds")]
fn for_each_mesh_out_of_range_panics() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(
        &mut device,
        vec![
            strip_model(3, 3, -1.0),
            strip_model(3, 3, -2.0),
            strip_model(3, 3, -3.0),
        ],
    );
    batch.for_each_mesh(&mut device, 2, 2, |_| {});
}

#[test]
#[should_panic(expected = "out of bounds")]
fn for_each_mesh_overflowing_range_panics() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0)]);
    batch.for_each_mesh(&mut device, 1, usize::MAX, |_| {});
}

#[test]
fn for_each_draw_command_round_trips() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(
        &mut device,
        vec![strip_model(3, 3, -1.0), strip_model(3, 6, -2.0)],
    );
    let first_before = device.read_buffer::<DrawCommand>(batch.draw_command_buffer())[0];

    batch.for_each_draw_command(&mut device, 1, 1, |cmd| cmd.base_instance = 9);

    let uploaded = device.read_buffer::<DrawCommand>(batch.draw_command_buffer());
    assert_eq!(uploaded[0], first_before);
    assert_eq!(uploaded[1].base_instance, 9);
    assert_eq!(uploaded[1].index_count, 6);
    assert_eq!(uploaded.as_slice(), batch.draw_commands());
}

#[test]
#[should_panic(expected = "draw command range")]
fn for_each_draw_command_out_of_range_panics() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0)]);
    batch.for_each_draw_command(&mut device, 0, 2, |_| {});
}

// ============================================================================
// Mesh Patch Tests
// ============================================================================

#[test]
fn mesh_patches_upload_covering_range_once() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(
        &mut device,
        vec![
            strip_model(3, 3, -1.0),
            strip_model(3, 3, -2.0),
            strip_model(3, 3, -3.0),
            strip_model(3, 3, -4.0),
        ],
    );
    device.take_commands();

    let mut patched = batch.meshes()[2];
    patched.model = Mat4::from_scale(Vec3::splat(2.0));
    let mut first = batch.meshes()[1];
    first.material_index = 0;
    batch.apply_mesh_patches(
        &mut device,
        &[
            MeshPatch {
                index: 2,
                value: patched,
            },
            MeshPatch {
                index: 1,
                value: first,
            },
        ],
    );

    let stride = size_of::<Mesh>() as u64;
    assert_eq!(
        device.commands(),
        &[Command::UploadBuffer {
            label: "meshes",
            offset: stride,
            size: 2 * stride,
        }]
    );
    assert_eq!(batch.meshes()[2], patched);
    assert_eq!(batch.meshes()[1].material_index, 0);
    assert_eq!(
        device.read_buffer::<Mesh>(batch.mesh_buffer()).as_slice(),
        batch.meshes()
    );
}

#[test]
fn empty_mesh_patch_list_is_noop() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(&mut device, vec![strip_model(3, 3, -1.0)]);
    device.take_commands();

    batch.apply_mesh_patches(&mut device, &[]);
    assert!(device.commands().is_empty());
    assert_eq!(batch.transform_version(), 0);
}

#[test]
fn invalid_mesh_patch_writes_nothing() {
    let mut device = HeadlessDevice::new();
    let mut batch = batch_with(
        &mut device,
        vec![strip_model(3, 3, -1.0), strip_model(3, 3, -2.0)],
    );
    let before = batch.meshes().to_vec();

    let mut changed = before[0];
    changed.model = Mat4::from_translation(Vec3::X);
    let result = catch_unwind(AssertUnwindSafe(|| {
        batch.apply_mesh_patches(
            &mut device,
            &[
                MeshPatch {
                    index: 0,
                    value: changed,
                },
                MeshPatch {
                    index: 5,
                    value: changed,
                },
            ],
        );
    }));

    assert!(result.is_err());
    assert_eq!(batch.meshes(), before.as_slice());
}

// ============================================================================
// Culling Tests
// ============================================================================

#[test]
fn aabb_in_frustum_accepts_box_in_front() {
    let vp = camera_view_projection();
    assert!(aabb_in_frustum(vp, Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -4.0)));
}

#[test]
fn aabb_in_frustum_rejects_box_behind() {
    let vp = camera_view_projection();
    assert!(!aabb_in_frustum(vp, Vec3::new(-1.0, -1.0, 4.0), Vec3::new(1.0, 1.0, 6.0)));
}

#[test]
fn aabb_in_frustum_rejects_box_beyond_far() {
    let vp = camera_view_projection();
    assert!(!aabb_in_frustum(
        vp,
        Vec3::new(-1.0, -1.0, -300.0),
        Vec3::new(1.0, 1.0, -200.0)
    ));
}

#[test]
fn aabb_straddling_a_plane_is_kept() {
    let vp = camera_view_projection();
    assert!(aabb_in_frustum(vp, Vec3::new(-50.0, -1.0, -6.0), Vec3::new(0.0, 1.0, -4.0)));
}

#[test]
fn cull_writes_instance_counts() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device);
    let batch = batch_with(
        &mut device,
        vec![strip_model(4, 3, -5.0), strip_model(4, 3, 5.0)],
    );

    let mut ctx = RenderContext::new(&mut device, frame);
    batch.cull(&mut ctx, camera_view_projection());
    drop(ctx);

    let cmds = device.read_buffer::<DrawCommand>(batch.draw_command_buffer());
    assert_eq!(cmds[0].instance_count, 1);
    assert_eq!(cmds[1].instance_count, 0);
    // The CPU copy keeps what was uploaded
    assert_eq!(batch.draw_commands()[1].instance_count, 1);
}

#[test]
fn cull_is_idempotent() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device);
    let batch = batch_with(
        &mut device,
        vec![
            strip_model(4, 3, -5.0),
            strip_model(4, 3, 5.0),
            strip_model(4, 3, -50.0),
        ],
    );
    let vp = camera_view_projection();

    let mut ctx = RenderContext::new(&mut device, frame);
    batch.cull(&mut ctx, vp);
    drop(ctx);
    let first = device.read_buffer::<DrawCommand>(batch.draw_command_buffer());

    let mut ctx = RenderContext::new(&mut device, frame);
    batch.cull(&mut ctx, vp);
    drop(ctx);
    let second = device.read_buffer::<DrawCommand>(batch.draw_command_buffer());

    assert_eq!(first, second);
}

#[test]
fn cull_dispatches_one_invocation_per_mesh_then_barrier() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device);
    let models = (0..40).map(|i| strip_model(3, 3, -1.0 - i as f32)).collect();
    let batch = batch_with(&mut device, models);
    device.take_commands();

    let mut ctx = RenderContext::new(&mut device, frame);
    batch.cull(&mut ctx, camera_view_projection());
    drop(ctx);

    let commands = device.commands();
    let dispatch = commands
        .iter()
        .position(|c| matches!(c, Command::Dispatch { program: "scene_cull", .. }))
        .expect("cull dispatch");
    assert_eq!(
        commands[dispatch],
        Command::Dispatch {
            program: "scene_cull",
            groups: [2, 1, 1],
        }
    );
    let Command::Barrier(flags) = commands[dispatch + 1] else {
        panic!("cull must be followed by a barrier, got {:?}", commands[dispatch + 1]);
    };
    assert!(flags.contains(lumen::renderer::core::BarrierFlags::COMMAND));
    assert!(flags.contains(lumen::renderer::core::BarrierFlags::SHADER_STORAGE));
}

#[test]
fn cull_on_empty_batch_records_nothing() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device);
    let batch = SceneBatch::new(&mut device).unwrap();
    device.take_commands();

    let mut ctx = RenderContext::new(&mut device, frame);
    batch.cull(&mut ctx, camera_view_projection());
    batch.draw(&mut ctx);
    drop(ctx);

    assert!(device.commands().is_empty());
}

#[test]
fn draw_after_cull_is_hazard_free() {
    let mut device = HeadlessDevice::new();
    let frame = frame_buffer(&mut device);
    let program = device
        .create_program(&ProgramDesc::graphics(
            "test_draw",
            GraphicsState {
                color_formats: &[],
                depth_format: None,
                depth_write: false,
                depth_compare: wgpu::CompareFunction::Always,
                alpha_blend: false,
                topology: wgpu::PrimitiveTopology::TriangleList,
                vertex_input: VertexInput::SceneVertex,
            },
        ))
        .unwrap();
    let batch = batch_with(
        &mut device,
        vec![strip_model(10, 6, -5.0), strip_model(15, 9, 5.0)],
    );

    let mut ctx = RenderContext::new(&mut device, frame);
    batch.cull(&mut ctx, camera_view_projection());
    ctx.begin_render_pass(&RenderPassDesc::new("test_pass"));
    ctx.use_program(program);
    ctx.reset_bindings();
    batch.draw(&mut ctx);
    ctx.end_render_pass();
    drop(ctx);

    assert!(device.hazards().is_empty(), "{:?}", device.hazards());
    assert!(device.commands().contains(&Command::DrawIndexedIndirect {
        program: "test_draw",
        draw_count: 2,
        visible: 1,
    }));
}
