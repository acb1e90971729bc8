//! Camera ray generation and the NDC reparameterization of forward-facing rays.

pub mod camera;
pub mod ndc;

pub use camera::{CameraConvention, CameraRays, camera_direction, direction_jacobian, rays_for};
pub use ndc::{GpuRay, NDC_EPSILON, NdcProjector, RayBatch};
