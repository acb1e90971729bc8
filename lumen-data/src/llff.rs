//! LLFF dataset loading.
//!
//! A subject directory looks like:
//!
//! ```text
//! <root>/<subject>/poses_bounds.npy
//! <root>/<subject>/images/          full resolution
//! <root>/<subject>/images_8/        downsampled by an integer factor
//! <root>/<subject>/images_504x378/  downsampled to an explicit size
//! ```
//!
//! Resized directories are produced by external tooling; the loader only
//! selects one. All derivation (intrinsics override, axis conversion, scale
//! normalization, recentering, render path) happens before the
//! [`LlffDataset`] is constructed, which is read-only afterwards.

use crate::archive::{ArchiveRow, read_pose_archive};
use crate::error::{DataError, DataResult};
use crate::poses::{self, SpiralParams};
use crate::types::{Bounds, CameraPose, HomogeneousTransform, Intrinsics, PathKind, RenderPath};
use glam::Vec3;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Name of the pose archive inside a subject directory.
pub const POSE_ARCHIVE: &str = "poses_bounds.npy";

/// Every `TEST_HOLDOUT_STRIDE`-th view is held out for testing.
pub const TEST_HOLDOUT_STRIDE: usize = 8;

const IMAGE_EXTENSIONS: [&str; 3] = ["JPG", "jpg", "png"];

/// Which pre-resized image set to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageResolution {
    /// `images/`, factor 1.
    Native,
    /// `images_{factor}/`.
    Factor(u32),
    /// `images_{width}x{height}/` with the height derived from the aspect ratio.
    Width(u32),
    /// `images_{width}x{height}/` with the width derived from the aspect ratio.
    Height(u32),
}

impl Default for ImageResolution {
    fn default() -> Self {
        ImageResolution::Factor(4)
    }
}

/// Options controlling how an LLFF subject is normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct LlffOptions {
    pub resolution: ImageResolution,
    /// Scale so the closest depth bound becomes `1 / bd_factor`. `None` keeps the scene scale.
    pub bd_factor: Option<f32>,
    pub recenter: bool,
    pub spherify: bool,
    /// Use a single flat sweep instead of the full spiral.
    pub path_zflat: bool,
}

impl Default for LlffOptions {
    fn default() -> Self {
        Self {
            resolution: ImageResolution::default(),
            bd_factor: Some(0.75),
            recenter: true,
            spherify: false,
            path_zflat: false,
        }
    }
}

/// Dataset partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Test,
}

impl FromStr for Split {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            other => Err(DataError::InvalidConfiguration(format!(
                "unknown split '{other}', expected train or test"
            ))),
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => f.write_str("train"),
            Split::Test => f.write_str("test"),
        }
    }
}

/// Disjoint train/test view indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    /// View `i` is a test view iff `i % 8 == 0`.
    pub fn holdout(count: usize) -> Self {
        let (test, train) = (0..count).partition(|i| i % TEST_HOLDOUT_STRIDE == 0);
        Self { train, test }
    }

    pub fn get(&self, split: Split) -> &[usize] {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }
}

/// A fully normalized LLFF subject.
#[derive(Debug, Clone)]
pub struct LlffDataset {
    images: Vec<RgbImage>,
    poses: Vec<CameraPose>,
    bounds: Vec<Bounds>,
    intrinsics: Intrinsics,
    render_path: RenderPath,
    splits: SplitIndices,
    holdout_view: usize,
}

impl LlffDataset {
    pub fn images(&self) -> &[RgbImage] {
        &self.images
    }

    pub fn poses(&self) -> &[CameraPose] {
        &self.poses
    }

    pub fn bounds(&self) -> &[Bounds] {
        &self.bounds
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    pub fn render_path(&self) -> &RenderPath {
        &self.render_path
    }

    pub fn splits(&self) -> &SplitIndices {
        &self.splits
    }

    /// View whose camera is closest to the average camera.
    pub fn holdout_view(&self) -> usize {
        self.holdout_view
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// (width, height) of every image in the set.
    pub fn resolution(&self) -> (u32, u32) {
        self.images.first().map(RgbImage::dimensions).unwrap_or((0, 0))
    }

    /// Images and camera-to-world transforms of one split, in dataset order.
    pub fn split_views(&self, split: Split) -> (Vec<RgbImage>, Vec<HomogeneousTransform>) {
        self.splits
            .get(split)
            .iter()
            .map(|&i| (self.images[i].clone(), self.poses[i].c2w))
            .unzip()
    }
}

/// Load and normalize an LLFF subject stored under `root/subject_id`.
#[tracing::instrument(skip_all, fields(root = %root.display(), subject = subject_id))]
pub fn load_llff_data(root: &Path, subject_id: &str, options: &LlffOptions) -> DataResult<LlffDataset> {
    let data_dir = root.join(subject_id);
    let rows = read_pose_archive(&data_dir.join(POSE_ARCHIVE))?;

    let (image_dir, factor) = resolve_image_dir(&data_dir, options.resolution)?;
    let files = list_images(&image_dir)?;
    if files.len() != rows.len() {
        return Err(DataError::DatasetMismatch {
            images: files.len(),
            poses: rows.len(),
        });
    }

    let images = files
        .iter()
        .map(|f| Ok(image::open(f)?.to_rgb8()))
        .collect::<DataResult<Vec<_>>>()?;
    let (width, height) = images
        .first()
        .map(RgbImage::dimensions)
        .ok_or_else(|| DataError::DatasetMismatch { images: 0, poses: 0 })?;
    if let Some((i, img)) = images
        .iter()
        .enumerate()
        .find(|(_, img)| img.dimensions() != (width, height))
    {
        return Err(DataError::InvalidConfiguration(format!(
            "image {} is {:?}, expected {width}x{height}",
            files[i].display(),
            img.dimensions()
        )));
    }
    info!("Loaded image data: {} images of {}x{}", images.len(), width, height);

    let mut poses: Vec<CameraPose> = rows
        .iter()
        .map(|row| camera_from_row(row, height, width, factor))
        .collect();
    let mut bounds: Vec<Bounds> = rows.iter().map(|r| r.bounds).collect();

    let (near_min, far_max) = depth_range(&bounds);
    info!("Depth bounds [{:.4}, {:.4}]", near_min, far_max);
    if !(near_min > 0.0) {
        return Err(DataError::DegenerateGeometry(format!(
            "depth bounds must be positive, smallest is {near_min}"
        )));
    }

    if let Some(bd_factor) = options.bd_factor {
        let scale = 1.0 / (near_min * bd_factor);
        for pose in &mut poses {
            pose.c2w.translation *= scale;
        }
        for b in &mut bounds {
            *b = b.scaled(scale);
        }
        debug!("Rescaled scene by {:.4}", scale);
    }

    if options.recenter {
        poses = poses::recenter(&poses)?;
    }

    let render_path = if options.spherify {
        let spherified = poses::spherify(&poses, &bounds)?;
        poses = spherified.poses;
        bounds = spherified.bounds;
        spherified.render_path
    } else {
        spiral_render_path(&poses, &bounds, options.path_zflat)?
    };

    let average = poses::average_pose(&poses)?;
    let holdout_view = poses
        .iter()
        .map(|p| p.position().distance_squared(average.position()))
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    info!("Holdout view is {}", holdout_view);

    let hwf = poses[0].hwf;
    let intrinsics = Intrinsics::from_hwf(hwf.x as u32, hwf.y as u32, hwf.z);
    let splits = SplitIndices::holdout(images.len());

    Ok(LlffDataset {
        images,
        poses,
        bounds,
        intrinsics,
        render_path,
        splits,
        holdout_view,
    })
}

/// Select the image directory for `resolution` and the matching downsampling factor.
pub fn resolve_image_dir(data_dir: &Path, resolution: ImageResolution) -> DataResult<(PathBuf, f32)> {
    let (suffix, factor) = match resolution {
        ImageResolution::Native => (String::new(), 1.0),
        ImageResolution::Factor(f) => {
            if f == 0 {
                return Err(DataError::InvalidConfiguration(
                    "downsampling factor must be positive".into(),
                ));
            }
            (format!("_{f}"), f as f32)
        }
        ImageResolution::Width(w) | ImageResolution::Height(w) if w == 0 => {
            return Err(DataError::InvalidConfiguration(
                "target resolution must be positive".into(),
            ));
        }
        ImageResolution::Width(width) => {
            let (w0, h0) = full_resolution(data_dir)?;
            let factor = w0 as f32 / width as f32;
            let height = (h0 as f32 / factor) as u32;
            (format!("_{width}x{height}"), factor)
        }
        ImageResolution::Height(height) => {
            let (w0, h0) = full_resolution(data_dir)?;
            let factor = h0 as f32 / height as f32;
            let width = (w0 as f32 / factor) as u32;
            (format!("_{width}x{height}"), factor)
        }
    };

    let dir = data_dir.join(format!("images{suffix}"));
    if !dir.is_dir() {
        return Err(DataError::MissingResolution(dir));
    }
    Ok((dir, factor))
}

/// Sorted image files (`JPG`, `jpg`, `png`) in `dir`.
pub fn list_images(dir: &Path) -> DataResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| IMAGE_EXTENSIONS.iter().any(|ext| n.ends_with(ext)));
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// (width, height) of the first full-resolution image.
fn full_resolution(data_dir: &Path) -> DataResult<(u32, u32)> {
    let dir = data_dir.join("images");
    if !dir.is_dir() {
        return Err(DataError::MissingResolution(dir));
    }
    let first = list_images(&dir)?
        .into_iter()
        .next()
        .ok_or(DataError::MissingResolution(dir))?;
    Ok(image::image_dimensions(first)?)
}

/// Convert one archive row into a camera pose.
///
/// LLFF stores the rotation as (down, right, backward); this swaps the first
/// two columns and negates the new second one to get (right, up, backward).
/// The height/width entries are replaced by the loaded resolution and the
/// focal length is divided by the downsampling factor.
pub fn camera_from_row(row: &ArchiveRow, height: u32, width: u32, factor: f32) -> CameraPose {
    let col = |c: usize| Vec3::new(row.at(0, c), row.at(1, c), row.at(2, c));
    let c2w = HomogeneousTransform::from_columns(col(1), -col(0), col(2), col(3));
    CameraPose::new(
        c2w,
        Vec3::new(height as f32, width as f32, row.at(2, 4) / factor),
    )
}

fn depth_range(bounds: &[Bounds]) -> (f32, f32) {
    bounds.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), b| {
        (lo.min(b.near).min(b.far), hi.max(b.near).max(b.far))
    })
}

/// Spiral path around the average pose, focused at a depth blended between
/// the closest and a far-away depth.
fn spiral_render_path(poses: &[CameraPose], bounds: &[Bounds], zflat: bool) -> DataResult<RenderPath> {
    let mut center = poses::average_pose(poses)?;
    let up = poses
        .iter()
        .map(|p| p.c2w.rotation.y_axis)
        .sum::<Vec3>()
        .try_normalize()
        .ok_or_else(|| DataError::DegenerateGeometry("summed up axis is zero".into()))?;

    let (near_min, far_max) = depth_range(bounds);
    let close_depth = near_min * 0.9;
    let inf_depth = far_max * 5.0;
    let dt = 0.75;
    let focal_depth = 1.0 / ((1.0 - dt) / close_depth + dt / inf_depth);

    let abs_axis = |axis: usize| -> Vec<f32> {
        poses.iter().map(|p| p.position()[axis].abs()).collect()
    };
    let radii = Vec3::from_array(
        [0, 1, 2].map(|axis| poses::percentile(&abs_axis(axis), 90.0).unwrap_or(0.0)),
    );

    let mut params = SpiralParams {
        radii,
        focal_depth,
        z_delta: close_depth * 0.2,
        z_rate: 0.5,
        rotations: 2.0,
        views: 120,
    };
    let kind = if zflat {
        let zloc = -close_depth * 0.1;
        center.c2w.translation += zloc * center.c2w.rotation.z_axis;
        params = params.flattened();
        PathKind::FlatSpiral
    } else {
        PathKind::Spiral
    };
    debug!("Spiral focus depth {:.4}, radii {}", focal_depth, radii);

    Ok(RenderPath::new(kind, poses::spiral_path(&center, up, &params)?))
}
