//! Pixel coordinates to world-space rays.

use crate::sampling::ImageIds;
use glam::Vec3;
use lumen_data::{HomogeneousTransform, Intrinsics};
use serde::{Deserialize, Serialize};

/// Axis convention of the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraConvention {
    /// x right, y up, looking down -z.
    #[default]
    OpenGl,
    /// x right, y down, looking down +z.
    OpenCv,
}

impl CameraConvention {
    pub fn sign(&self) -> f32 {
        match self {
            CameraConvention::OpenGl => -1.0,
            CameraConvention::OpenCv => 1.0,
        }
    }
}

/// Camera-space direction through the centre of pixel `(x, y)`.
pub fn camera_direction(intrinsics: &Intrinsics, convention: CameraConvention, x: f32, y: f32) -> Vec3 {
    let sign = convention.sign();
    Vec3::new(
        (x - intrinsics.cx + 0.5) / intrinsics.fx,
        sign * (y - intrinsics.cy + 0.5) / intrinsics.fy,
        sign,
    )
}

/// Derivatives of the world-space ray direction with respect to the pixel
/// coordinates, `(d dir / dx, d dir / dy)`.
pub fn direction_jacobian(
    c2w: &HomogeneousTransform,
    intrinsics: &Intrinsics,
    convention: CameraConvention,
) -> (Vec3, Vec3) {
    (
        c2w.rotation.x_axis / intrinsics.fx,
        c2w.rotation.y_axis * (convention.sign() / intrinsics.fy),
    )
}

/// World-space rays. Directions are not normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraRays {
    pub origins: Vec<Vec3>,
    pub directions: Vec<Vec3>,
}

impl CameraRays {
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Unit-length view directions.
    pub fn viewdirs(&self) -> Vec<Vec3> {
        self.directions.iter().map(|d| d.normalize_or_zero()).collect()
    }
}

/// Rays through pixels `(xs[i], ys[i])` of views `image_ids.get(i)`.
///
/// `xs` and `ys` must have the same length and every image id must index
/// `c2ws`; the samplers guarantee both.
pub fn rays_for(
    c2ws: &[HomogeneousTransform],
    intrinsics: &Intrinsics,
    convention: CameraConvention,
    image_ids: &ImageIds,
    xs: &[f32],
    ys: &[f32],
) -> CameraRays {
    let (origins, directions) = xs
        .iter()
        .zip(ys)
        .enumerate()
        .map(|(i, (&x, &y))| {
            let c2w = &c2ws[image_ids.get(i)];
            let dir = c2w.transform_vector(camera_direction(intrinsics, convention, x, y));
            (c2w.translation, dir)
        })
        .unzip();
    CameraRays { origins, directions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Mat3;

    fn intrinsics() -> Intrinsics {
        Intrinsics::from_hwf(4, 6, 5.0)
    }

    #[test]
    fn test_centre_pixel_looks_down_the_optical_axis() {
        let k = intrinsics();
        // cx = 3, cy = 2; the pixel whose centre sits on the axis is (2.5, 1.5).
        let gl = camera_direction(&k, CameraConvention::OpenGl, 2.5, 1.5);
        assert!(gl.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
        let cv = camera_direction(&k, CameraConvention::OpenCv, 2.5, 1.5);
        assert!(cv.abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), 1e-6));
    }

    #[test]
    fn test_opengl_flips_image_rows() {
        let k = intrinsics();
        let top = camera_direction(&k, CameraConvention::OpenGl, 0.0, 0.0);
        assert_relative_eq!(top.x, (0.0 - 3.0 + 0.5) / 5.0);
        assert_relative_eq!(top.y, -(0.0 - 2.0 + 0.5) / 5.0);
        assert!(top.y > 0.0);
    }

    #[test]
    fn test_rays_use_pose_of_each_image() {
        let k = intrinsics();
        let shifted = HomogeneousTransform::new(Mat3::IDENTITY, Vec3::new(1.0, 2.0, 3.0));
        let turned = HomogeneousTransform::new(
            Mat3::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::ZERO,
        );
        let rays = rays_for(
            &[shifted, turned],
            &k,
            CameraConvention::OpenGl,
            &ImageIds::PerRay(vec![0, 1]),
            &[2.5, 2.5],
            &[1.5, 1.5],
        );
        assert_eq!(rays.len(), 2);
        assert!(rays.origins[0].abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
        assert!(rays.directions[0].abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!(rays.origins[1].abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!(rays.directions[1].abs_diff_eq(Vec3::NEG_X, 1e-6));
    }

    #[test]
    fn test_viewdirs_are_unit_length() {
        let k = intrinsics();
        let rays = rays_for(
            &[HomogeneousTransform::IDENTITY],
            &k,
            CameraConvention::OpenGl,
            &ImageIds::Single(0),
            &[0.0, 5.0, 3.0],
            &[0.0, 3.0, 1.0],
        );
        for (dir, unit) in rays.directions.iter().zip(rays.viewdirs()) {
            assert_relative_eq!(unit.length(), 1.0, epsilon = 1e-6);
            assert!(unit.abs_diff_eq(dir.normalize(), 1e-6));
        }
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let k = intrinsics();
        let c2w = HomogeneousTransform::new(Mat3::from_rotation_x(0.3), Vec3::ONE);
        let (dx, dy) = direction_jacobian(&c2w, &k, CameraConvention::OpenGl);
        let at = |x, y| c2w.transform_vector(camera_direction(&k, CameraConvention::OpenGl, x, y));
        let base = at(1.25, 2.5);
        assert!((at(2.25, 2.5) - base).abs_diff_eq(dx, 1e-5));
        assert!((at(1.25, 3.5) - base).abs_diff_eq(dy, 1e-5));
    }
}
