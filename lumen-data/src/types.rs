//! Core camera types shared by the loader, the pose normalizer and the ray sampler.
//!
//! Poses are camera-to-world transforms. The rotation columns are the camera's
//! (right, up, backward) axes in world space and the translation is the camera
//! center.

use crate::error::{DataError, DataResult};
use glam::{Mat3, Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Tolerance used when checking the homogeneous bottom row.
const AFFINE_ROW_TOLERANCE: f32 = 1e-6;

/// A 3x4 affine transform with an implicit `[0, 0, 0, 1]` bottom row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomogeneousTransform {
    /// Linear part (rotation for rigid camera poses).
    pub rotation: Mat3,
    /// Translation column.
    pub translation: Vec3,
}

impl HomogeneousTransform {
    pub const IDENTITY: Self = Self {
        rotation: Mat3::IDENTITY,
        translation: Vec3::ZERO,
    };

    /// Create a transform from its rotation block and translation column.
    pub fn new(rotation: Mat3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a transform from its four columns.
    pub fn from_columns(x: Vec3, y: Vec3, z: Vec3, translation: Vec3) -> Self {
        Self {
            rotation: Mat3::from_cols(x, y, z),
            translation,
        }
    }

    /// Column `index` of the 3x4 matrix (0..=2 rotation, 3 translation).
    pub fn column(&self, index: usize) -> Vec3 {
        match index {
            3 => self.translation,
            i => self.rotation.col(i),
        }
    }

    /// Expand to a full 4x4 homogeneous matrix.
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols(
            self.rotation.x_axis.extend(0.0),
            self.rotation.y_axis.extend(0.0),
            self.rotation.z_axis.extend(0.0),
            self.translation.extend(1.0),
        )
    }

    /// Drop the bottom row of a 4x4 matrix.
    ///
    /// Fails if the bottom row is not `[0, 0, 0, 1]`.
    pub fn from_mat4(matrix: Mat4) -> DataResult<Self> {
        let bottom = matrix.row(3);
        if (bottom - Vec4::W).abs().max_element() > AFFINE_ROW_TOLERANCE {
            return Err(DataError::DegenerateGeometry(format!(
                "matrix is not affine, bottom row is {bottom}"
            )));
        }
        Ok(Self {
            rotation: Mat3::from_mat4(matrix),
            translation: matrix.w_axis.truncate(),
        })
    }

    /// General affine inverse.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// `self * other`, i.e. apply `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    /// Row-major 3x4 representation.
    pub fn to_rows(&self) -> [[f32; 4]; 3] {
        let m = self.to_mat4();
        [0, 1, 2].map(|r| m.row(r).to_array())
    }

    /// Build from a row-major 3x4 matrix.
    pub fn from_rows(rows: [[f32; 4]; 3]) -> Self {
        let col = |c: usize| Vec3::new(rows[0][c], rows[1][c], rows[2][c]);
        Self::from_columns(col(0), col(1), col(2), col(3))
    }
}

impl Default for HomogeneousTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::ops::Mul for HomogeneousTransform {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.compose(&rhs)
    }
}

/// A camera-to-world pose with its appended (height, width, focal) column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// Camera-to-world transform.
    pub c2w: HomogeneousTransform,
    /// Image height, image width and focal length in pixels.
    pub hwf: Vec3,
}

impl CameraPose {
    pub fn new(c2w: HomogeneousTransform, hwf: Vec3) -> Self {
        Self { c2w, hwf }
    }

    /// Camera center in world space.
    pub fn position(&self) -> Vec3 {
        self.c2w.translation
    }

    pub fn height(&self) -> f32 {
        self.hwf.x
    }

    pub fn width(&self) -> f32 {
        self.hwf.y
    }

    pub fn focal(&self) -> f32 {
        self.hwf.z
    }
}

/// Near/far scene depth bounds for a single view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub near: f32,
    pub far: f32,
}

impl Bounds {
    pub fn new(near: f32, far: f32) -> Self {
        Self { near, far }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            near: self.near * factor,
            far: self.far * factor,
        }
    }
}

/// Pinhole intrinsics with the principal point at the image center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Build `K` from an image resolution and a shared focal length.
    pub fn from_hwf(height: u32, width: u32, focal: f32) -> Self {
        Self {
            fx: focal,
            fy: focal,
            cx: 0.5 * width as f32,
            cy: 0.5 * height as f32,
        }
    }

    /// The 3x3 `K` matrix.
    pub fn matrix(&self) -> Mat3 {
        Mat3::from_cols(
            Vec3::new(self.fx, 0.0, 0.0),
            Vec3::new(0.0, self.fy, 0.0),
            Vec3::new(self.cx, self.cy, 1.0),
        )
    }
}

/// Which generator produced a render path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Spiral,
    FlatSpiral,
    Spherical,
}

/// Synthetic camera trajectory used for visualization only.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPath {
    pub kind: PathKind,
    pub poses: Vec<CameraPose>,
}

impl RenderPath {
    pub fn new(kind: PathKind, poses: Vec<CameraPose>) -> Self {
        Self { kind, poses }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Serialize to the JSON export format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let record = RenderPathRecord {
            kind: self.kind,
            poses: self
                .poses
                .iter()
                .map(|p| PoseRecord {
                    c2w: p.c2w.to_rows(),
                    hwf: p.hwf.to_array(),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&record)
    }
}

#[derive(Serialize, Deserialize)]
struct PoseRecord {
    c2w: [[f32; 4]; 3],
    hwf: [f32; 3],
}

#[derive(Serialize, Deserialize)]
struct RenderPathRecord {
    kind: PathKind,
    poses: Vec<PoseRecord>,
}
