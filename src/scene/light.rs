use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Cube shadow map parameters of a shadow-casting point light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    /// Edge length of each cube face.
    pub resolution: u32,
    pub near: f32,
    pub far: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            near: 0.5,
            far: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    /// Linear radiance; may exceed 1.
    pub color: Vec3,
    /// Emitter radius, used for soft shadows.
    pub radius: f32,
    pub shadow: Option<ShadowSettings>,
}

impl PointLight {
    #[must_use]
    pub fn new(position: Vec3, color: Vec3, radius: f32) -> Self {
        Self {
            position,
            color,
            radius,
            shadow: None,
        }
    }

    #[must_use]
    pub fn with_shadow(mut self, shadow: ShadowSettings) -> Self {
        self.shadow = Some(shadow);
        self
    }

    #[must_use]
    pub fn to_gpu(&self) -> GpuLight {
        GpuLight {
            position: self.position,
            radius: self.radius,
            color: self.color,
            _pad: 0.0,
        }
    }
}

/// std430 layout of one entry of the light buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub _pad: f32,
}

/// The two-light setup of the bundled demo scene: a warm shadow-casting key
/// light and a small cool fill light.
#[must_use]
pub fn default_lights() -> Vec<PointLight> {
    vec![
        PointLight::new(
            Vec3::new(-6.0, 21.0, 2.95),
            Vec3::new(4.585, 4.725, 2.56) * 10.0,
            1.0,
        )
        .with_shadow(ShadowSettings {
            resolution: 1536,
            near: 1.0,
            far: 60.0,
        }),
        PointLight::new(
            Vec3::new(-13.5, 4.7, 1.0),
            Vec3::new(0.5, 0.8, 0.9) * 3.0,
            0.5,
        )
        .with_shadow(ShadowSettings {
            resolution: 256,
            near: 0.5,
            far: 60.0,
        }),
    ]
}
