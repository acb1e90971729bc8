//! Normalized device coordinates for forward-facing captures.
//!
//! Rays are first slid along their direction onto the plane `z = -near`,
//! then mapped through the perspective transform so that the unbounded
//! depth range in front of the camera lands in `[-1, 1]`.

use super::camera::CameraRays;
use glam::Vec3;

/// Smallest magnitude allowed for a z component used as a divisor.
pub const NDC_EPSILON: f32 = 1e-6;

/// Clamp `value` away from zero keeping its sign; zero goes to the forward side.
fn guard(value: f32) -> f32 {
    if value.abs() >= NDC_EPSILON {
        value
    } else if value > 0.0 {
        NDC_EPSILON
    } else {
        -NDC_EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdcProjector {
    pub height: u32,
    pub width: u32,
    pub focal: f32,
    pub near: f32,
}

impl NdcProjector {
    pub fn new(height: u32, width: u32, focal: f32, near: f32) -> Self {
        Self {
            height,
            width,
            focal,
            near,
        }
    }

    fn scale(&self) -> (f32, f32) {
        (
            2.0 * self.focal / self.width as f32,
            2.0 * self.focal / self.height as f32,
        )
    }

    /// Project one ray. Returns the NDC origin and direction.
    pub fn project_ray(&self, origin: Vec3, direction: Vec3) -> (Vec3, Vec3) {
        let dz = guard(direction.z);
        let t = -(self.near + origin.z) / dz;
        let o = origin + t * direction;
        let oz = guard(o.z);
        let (sx, sy) = self.scale();

        let ndc_origin = Vec3::new(
            -sx * o.x / oz,
            -sy * o.y / oz,
            1.0 + 2.0 * self.near / oz,
        );
        let ndc_direction = Vec3::new(
            -sx * (direction.x / dz - o.x / oz),
            -sy * (direction.y / dz - o.y / oz),
            -2.0 * self.near / oz,
        );
        (ndc_origin, ndc_direction)
    }

    pub fn project(&self, rays: &CameraRays) -> RayBatch {
        let (origins, directions) = rays
            .origins
            .iter()
            .zip(&rays.directions)
            .map(|(&o, &d)| self.project_ray(o, d))
            .unzip();
        RayBatch { origins, directions }
    }

    /// Map an NDC point back to world space. `None` at the far plane (`p.z == 1`).
    pub fn ndc_to_world(&self, point: Vec3) -> Option<Vec3> {
        let denom = point.z - 1.0;
        if denom.abs() < NDC_EPSILON {
            return None;
        }
        let z = 2.0 * self.near / denom;
        let (sx, sy) = self.scale();
        Some(Vec3::new(-point.x * z / sx, -point.y * z / sy, z))
    }
}

/// Ray layout shared with compute shaders.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct GpuRay {
    pub origin: [f32; 3],
    pub _padding0: f32,
    pub direction: [f32; 3],
    pub _padding1: f32,
}

impl GpuRay {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin: origin.to_array(),
            _padding0: 0.0,
            direction: direction.to_array(),
            _padding1: 0.0,
        }
    }
}

/// Rays ready for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RayBatch {
    pub origins: Vec<Vec3>,
    pub directions: Vec<Vec3>,
}

impl RayBatch {
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn to_gpu(&self) -> Vec<GpuRay> {
        self.origins
            .iter()
            .zip(&self.directions)
            .map(|(&o, &d)| GpuRay::new(o, d))
            .collect()
    }
}
