//! Camera pose normalization for forward-facing and 360° captures.
//!
//! These are the LLFF pose utilities: averaging a set of cameras into one
//! reference frame, recentering every camera into it, re-centering a 360°
//! capture on the point its cameras look at ("spherify"), and synthesizing
//! spiral or circular render paths for visualization.
//!
//! Every routine takes poses by slice and returns new poses.

use crate::error::{DataError, DataResult};
use crate::types::{Bounds, CameraPose, HomogeneousTransform, PathKind, RenderPath};
use glam::{Mat3, Vec3};
use ordered_float::OrderedFloat;
use std::f32::consts::TAU;
use tracing::debug;

/// Vectors shorter than this are treated as degenerate.
const DEGENERATE_NORM: f32 = 1e-8;

/// Number of poses on the spherical render path.
pub const SPHERICAL_PATH_VIEWS: usize = 120;

fn normalize(v: Vec3, what: &str) -> DataResult<Vec3> {
    let len = v.length();
    if !len.is_finite() || len <= DEGENERATE_NORM {
        return Err(DataError::DegenerateGeometry(format!(
            "{what} has zero or invalid norm ({v})"
        )));
    }
    Ok(v / len)
}

/// Build a camera frame looking along `z` with approximate up vector `up`.
///
/// right = up × z, then the up axis is recomputed as z × right so the
/// result is right-handed and orthonormal.
pub fn view_matrix(z: Vec3, up: Vec3, position: Vec3) -> DataResult<HomogeneousTransform> {
    let z = normalize(z, "viewing axis")?;
    let x = normalize(up.cross(z), "right axis")?;
    let y = normalize(z.cross(x), "up axis")?;
    Ok(HomogeneousTransform::from_columns(x, y, z, position))
}

/// Mean camera of a set of poses.
///
/// Position is the mean camera center, the forward axis is the normalized sum
/// of forward axes and the up hint is the sum of up axes. The intrinsics
/// column is taken from the first pose.
pub fn average_pose(poses: &[CameraPose]) -> DataResult<CameraPose> {
    let first = poses
        .first()
        .ok_or_else(|| DataError::DegenerateGeometry("cannot average an empty pose set".into()))?;

    let center = poses.iter().map(CameraPose::position).sum::<Vec3>() / poses.len() as f32;
    let forward = normalize(
        poses.iter().map(|p| p.c2w.rotation.z_axis).sum::<Vec3>(),
        "summed forward axis",
    )?;
    let up = poses.iter().map(|p| p.c2w.rotation.y_axis).sum::<Vec3>();

    Ok(CameraPose::new(view_matrix(forward, up, center)?, first.hwf))
}

/// Express every pose in the frame of the average pose.
///
/// Afterwards the average pose of the returned set is the identity.
pub fn recenter(poses: &[CameraPose]) -> DataResult<Vec<CameraPose>> {
    let inverse = average_pose(poses)?.c2w.inverse();
    Ok(poses
        .iter()
        .map(|p| CameraPose::new(inverse * p.c2w, p.hwf))
        .collect())
}

/// Least-squares point closest to a set of lines.
///
/// Minimizes the summed squared distance to the lines `o_i + t * d_i` with
/// unit directions `d_i`.
pub fn closest_point_to_lines(origins: &[Vec3], directions: &[Vec3]) -> DataResult<Vec3> {
    if origins.is_empty() || origins.len() != directions.len() {
        return Err(DataError::DegenerateGeometry(format!(
            "need matching non-empty line sets, got {} origins and {} directions",
            origins.len(),
            directions.len()
        )));
    }

    let n = origins.len() as f32;
    let mut normal = Mat3::ZERO;
    let mut rhs = Vec3::ZERO;
    for (&o, &d) in origins.iter().zip(directions) {
        // projector onto the plane orthogonal to d
        let a = Mat3::IDENTITY - Mat3::from_cols(d * d.x, d * d.y, d * d.z);
        normal += a.transpose() * a;
        rhs += -(a * o);
    }
    normal *= 1.0 / n;
    rhs /= n;

    let det = normal.determinant();
    if !det.is_finite() || det.abs() <= 1e-10 {
        return Err(DataError::DegenerateGeometry(
            "viewing rays are parallel, no unique focus point".into(),
        ));
    }
    Ok(-(normal.inverse() * rhs))
}

/// Radius of the render circle at height `z` on a sphere of radius `radius`.
pub fn circle_radius(radius: f32, z: f32) -> DataResult<f32> {
    let squared = radius * radius - z * z;
    if !squared.is_finite() || squared < 0.0 {
        return Err(DataError::DegenerateGeometry(format!(
            "camera centroid height {z} exceeds sphere radius {radius}"
        )));
    }
    Ok(squared.sqrt())
}

/// Result of [`spherify`].
#[derive(Debug, Clone)]
pub struct Spherified {
    pub poses: Vec<CameraPose>,
    pub render_path: RenderPath,
    pub bounds: Vec<Bounds>,
}

/// Re-center a 360° capture on its focus point and normalize its scale.
///
/// The new origin is the point closest to all viewing rays, the new z axis
/// points at the mean camera offset, and the scene is scaled so the RMS camera
/// distance is 1. The render path is a circle of cameras at the mean height,
/// all looking at the origin.
pub fn spherify(poses: &[CameraPose], bounds: &[Bounds]) -> DataResult<Spherified> {
    let first = poses
        .first()
        .ok_or_else(|| DataError::DegenerateGeometry("cannot spherify an empty pose set".into()))?;
    let hwf = first.hwf;

    let origins: Vec<Vec3> = poses.iter().map(CameraPose::position).collect();
    let directions: Vec<Vec3> = poses.iter().map(|p| p.c2w.rotation.z_axis).collect();
    let center = closest_point_to_lines(&origins, &directions)?;

    let up = origins.iter().map(|&o| o - center).sum::<Vec3>() / origins.len() as f32;
    let vec0 = normalize(up, "mean camera offset")?;
    let vec1 = normalize(Vec3::new(0.1, 0.2, 0.3).cross(vec0), "spherify x axis")?;
    let vec2 = normalize(vec0.cross(vec1), "spherify y axis")?;
    let frame = HomogeneousTransform::from_columns(vec1, vec2, vec0, center).inverse();

    let mut reset: Vec<HomogeneousTransform> = poses.iter().map(|p| frame * p.c2w).collect();

    let radius = (reset.iter().map(|t| t.translation.length_squared()).sum::<f32>()
        / reset.len() as f32)
        .sqrt();
    if !radius.is_finite() || radius <= DEGENERATE_NORM {
        return Err(DataError::DegenerateGeometry(format!(
            "cameras collapse onto the focus point (radius {radius})"
        )));
    }
    let scale = 1.0 / radius;
    for t in &mut reset {
        t.translation *= scale;
    }
    let bounds = bounds.iter().map(|b| b.scaled(scale)).collect();

    let centroid = reset.iter().map(|t| t.translation).sum::<Vec3>() / reset.len() as f32;
    let height = centroid.z;
    let ring = circle_radius(1.0, height)?;
    debug!("Spherified {} poses, ring radius {:.4} at z {:.4}", poses.len(), ring, height);

    let up = Vec3::new(0.0, 0.0, -1.0);
    let path = (0..SPHERICAL_PATH_VIEWS)
        .map(|i| {
            let theta = TAU * i as f32 / (SPHERICAL_PATH_VIEWS - 1) as f32;
            let origin = Vec3::new(ring * theta.cos(), ring * theta.sin(), height);
            let z = normalize(origin, "path camera position")?;
            let x = normalize(z.cross(up), "path right axis")?;
            let y = normalize(z.cross(x), "path up axis")?;
            Ok(CameraPose::new(
                HomogeneousTransform::from_columns(x, y, z, origin),
                hwf,
            ))
        })
        .collect::<DataResult<Vec<_>>>()?;

    Ok(Spherified {
        poses: reset.into_iter().map(|c2w| CameraPose::new(c2w, hwf)).collect(),
        render_path: RenderPath::new(PathKind::Spherical, path),
        bounds,
    })
}

/// Parameters of a spiral render path around an average pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpiralParams {
    /// Per-axis radii of the ellipse, in the average pose's frame.
    pub radii: Vec3,
    /// Distance along the viewing axis of the point every camera looks at.
    pub focal_depth: f32,
    /// Depth offset carried with the path; the spiral itself is driven by
    /// `radii` and `z_rate`.
    pub z_delta: f32,
    /// Frequency of the depth oscillation relative to the rotation.
    pub z_rate: f32,
    /// Number of full turns.
    pub rotations: f32,
    /// Number of poses.
    pub views: usize,
}

impl SpiralParams {
    /// Single sweeping pan: no depth oscillation, one turn, half the views.
    pub fn flattened(self) -> Self {
        Self {
            radii: Vec3::new(self.radii.x, self.radii.y, 0.0),
            rotations: 1.0,
            views: self.views / 2,
            ..self
        }
    }

    pub fn is_flat(&self) -> bool {
        self.radii.z == 0.0
    }
}

/// Elliptical spiral of cameras around `center`'s viewing axis.
///
/// `theta` runs over `[0, 2π·rotations)` without the closing endpoint. Every
/// camera looks at the point `focal_depth` in front of the average camera.
pub fn spiral_path(center: &CameraPose, up: Vec3, params: &SpiralParams) -> DataResult<Vec<CameraPose>> {
    let c2w = &center.c2w;
    let target = c2w.transform_point(Vec3::new(0.0, 0.0, -params.focal_depth));
    (0..params.views)
        .map(|i| {
            let theta = TAU * params.rotations * i as f32 / params.views as f32;
            let offset = Vec3::new(theta.cos(), -theta.sin(), -(theta * params.z_rate).sin())
                * params.radii;
            let position = c2w.transform_point(offset);
            let c2w = view_matrix(position - target, up, position)?;
            Ok(CameraPose::new(c2w, center.hwf))
        })
        .collect()
}

/// `q`-th percentile (0..=100) with linear interpolation between order statistics.
pub fn percentile(values: &[f32], q: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<OrderedFloat<f32>> = values.iter().copied().map(OrderedFloat).collect();
    sorted.sort_unstable();

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    Some(sorted[lo].0 + (sorted[hi].0 - sorted[lo].0) * frac)
}
