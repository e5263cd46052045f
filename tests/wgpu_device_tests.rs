//! wgpu Backend Tests
//!
//! Tests for:
//! - Shader library lookups
//! - Parameter block layout (std140 offsets and padding)
//! - Device smoke test on a real adapter (skipped when none is available)
//!
//! ```text
//! cargo test --features wgpu-backend
//! ```

#![cfg(feature = "wgpu-backend")]

use glam::Vec4;

use lumen::renderer::core::{
    BufferDesc, ParamBlockLayout, ParamDecl, ProgramDesc, ProgramStage, ShaderLibrary,
    TextureDesc, UniformKind,
};
use lumen::{GpuDevice, LumenError, WgpuDevice};

// ============================================================================
// Shader Library
// ============================================================================

#[test]
fn shader_library_looks_up_by_label() {
    let mut shaders = ShaderLibrary::new().with("ssao", "// ssao");
    shaders.insert("composite", String::from("// composite"));

    assert_eq!(shaders.len(), 2);
    assert_eq!(shaders.get("ssao"), Some("// ssao"));
    assert_eq!(shaders.get("composite"), Some("// composite"));
    assert_eq!(shaders.get("ssr"), None);
}

#[test]
fn shader_library_insert_replaces() {
    let mut shaders = ShaderLibrary::new();
    assert!(shaders.is_empty());

    shaders.insert("forward", "// v1");
    shaders.insert("forward", "// v2");

    assert_eq!(shaders.len(), 1);
    assert_eq!(shaders.get("forward"), Some("// v2"));
}

// ============================================================================
// Parameter Block Layout
// ============================================================================

#[test]
fn empty_param_block_is_sixteen_bytes() {
    let layout = ParamBlockLayout::new(&[]);
    assert_eq!(layout.size(), 16);
    assert_eq!(layout.get("anything"), None);
}

#[test]
fn param_block_follows_std140_alignment() {
    let params = [
        ParamDecl::new("samples", UniformKind::I32),
        ParamDecl::new("scattering", UniformKind::F32),
        ParamDecl::new("direction", UniformKind::Vec3),
        ParamDecl::new("jitter", UniformKind::Vec2),
        ParamDecl::new("enabled", UniformKind::Bool),
        ParamDecl::new("transform", UniformKind::Mat4),
    ];

    let layout = ParamBlockLayout::new(&params);

    assert_eq!(layout.get("samples"), Some((0, UniformKind::I32)));
    assert_eq!(layout.get("scattering"), Some((4, UniformKind::F32)));
    // vec3 aligns to 16
    assert_eq!(layout.get("direction"), Some((16, UniformKind::Vec3)));
    // vec2 aligns to 8 after the 12-byte vec3
    assert_eq!(layout.get("jitter"), Some((32, UniformKind::Vec2)));
    assert_eq!(layout.get("enabled"), Some((40, UniformKind::Bool)));
    assert_eq!(layout.get("transform"), Some((48, UniformKind::Mat4)));
    assert_eq!(layout.size(), 112);
}

#[test]
fn param_block_size_rounds_up_to_sixteen() {
    let layout = ParamBlockLayout::new(&[
        ParamDecl::new("a", UniformKind::F32),
        ParamDecl::new("b", UniformKind::F32),
        ParamDecl::new("c", UniformKind::U32),
        ParamDecl::new("d", UniformKind::F32),
        ParamDecl::new("e", UniformKind::F32),
    ]);

    assert_eq!(layout.get("e"), Some((16, UniformKind::F32)));
    assert_eq!(layout.size(), 32);
}

// ============================================================================
// Device (needs an adapter)
// ============================================================================

fn request_device() -> Option<WgpuDevice> {
    match pollster::block_on(WgpuDevice::request(ShaderLibrary::new())) {
        Ok(device) => Some(device),
        Err(err) => {
            eprintln!("skipping wgpu device test: {err}");
            None
        }
    }
}

#[test]
fn device_smoke_test() {
    let Some(mut device) = request_device() else {
        return;
    };

    let buffer = device
        .create_buffer(&BufferDesc::new("smoke", wgpu::BufferUsages::STORAGE).with_size(64))
        .unwrap();
    assert_eq!(device.buffer_size(buffer), 64);

    device.allocate_buffer(buffer, &[7u8; 256]).unwrap();
    assert_eq!(device.buffer_size(buffer), 256);
    device.write_buffer(buffer, 128, &[1u8; 16]);

    let texture = device
        .create_texture(&TextureDesc::d2(
            "smoke_target",
            8,
            4,
            wgpu::TextureFormat::Rgba16Float,
        ))
        .unwrap();
    device.clear_texture(texture, Vec4::ONE);
    device.resize_texture(texture, 16, 8).unwrap();

    let desc = device.texture_desc(texture);
    assert_eq!(desc.size(), (16, 8));
    assert_eq!(desc.format, wgpu::TextureFormat::Rgba16Float);

    device.destroy_texture(texture);
    device.destroy_buffer(buffer);
}

#[test]
fn program_without_source_is_rejected() {
    let Some(mut device) = request_device() else {
        return;
    };

    let result = device.create_program(&ProgramDesc {
        label: "unregistered",
        stage: ProgramStage::Compute {
            workgroup_size: [8, 8],
        },
        params: &[],
        reference: None,
    });

    assert!(matches!(
        result,
        Err(LumenError::ProgramCreation {
            label: "unregistered",
            ..
        })
    ));
}
