//! Per-subject loader configuration.

use crate::error::{TrainError, TrainResult};
use crate::rays::CameraConvention;
use lumen_data::{ImageResolution, LlffOptions, Split};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The LLFF scenes the loader knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectId {
    Fern,
    Flower,
    Fortress,
    Horns,
    Leaves,
    Orchids,
    RoomLlff,
    Trex,
}

impl SubjectId {
    pub const ALL: [SubjectId; 8] = [
        SubjectId::Fern,
        SubjectId::Flower,
        SubjectId::Fortress,
        SubjectId::Horns,
        SubjectId::Leaves,
        SubjectId::Orchids,
        SubjectId::RoomLlff,
        SubjectId::Trex,
    ];

    /// Directory name of the subject.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectId::Fern => "fern",
            SubjectId::Flower => "flower",
            SubjectId::Fortress => "fortress",
            SubjectId::Horns => "horns",
            SubjectId::Leaves => "leaves",
            SubjectId::Orchids => "orchids",
            SubjectId::RoomLlff => "room_llff",
            SubjectId::Trex => "trex",
        }
    }
}

impl FromStr for SubjectId {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubjectId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| TrainError::InvalidConfiguration(format!("unknown subject '{s}'")))
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background colour composited behind training rays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    White,
    Black,
    Random,
    #[default]
    Gray,
}

impl FromStr for BackgroundMode {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" => Ok(BackgroundMode::White),
            "black" => Ok(BackgroundMode::Black),
            "random" => Ok(BackgroundMode::Random),
            "gray" => Ok(BackgroundMode::Gray),
            other => Err(TrainError::InvalidConfiguration(format!(
                "unknown background mode '{other}'"
            ))),
        }
    }
}

/// How training pixels are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingType {
    /// Independent uniform pixel coordinates.
    #[default]
    Uniform,
    /// Loss-driven importance sampling of float pixel coordinates.
    #[serde(alias = "lmc")]
    Learned,
}

impl FromStr for SamplingType {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(SamplingType::Uniform),
            "learned" | "lmc" => Ok(SamplingType::Learned),
            other => Err(TrainError::InvalidConfiguration(format!(
                "unknown sampling type '{other}'"
            ))),
        }
    }
}

/// Everything needed to build a [`crate::SubjectLoader`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectConfig {
    pub subject_id: SubjectId,
    /// Directory containing one sub-directory per subject.
    pub root: PathBuf,
    pub split: Split,
    pub color_bkgd_aug: BackgroundMode,
    /// Rays per training step. `None` selects evaluation mode (whole images).
    pub num_rays: Option<usize>,
    pub near: f32,
    pub far: f32,
    /// Draw image indices uniformly per ray instead of using the requested index.
    pub batch_over_images: bool,
    /// Integer downsampling factor. Takes precedence over `width`/`height`.
    pub factor: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sampling_type: SamplingType,
    pub bd_factor: Option<f32>,
    pub recenter: bool,
    pub spherify: bool,
    pub path_zflat: bool,
    /// Near plane of the NDC reparameterization.
    pub ndc_near: f32,
    pub opengl_camera: bool,
    pub seed: Option<u64>,
    /// Fraction of importance samples redrawn uniformly each step.
    pub min_fraction: f32,
    /// Fraction of lowest-loss importance samples redrawn each step.
    pub loss_min_fraction: f32,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            subject_id: SubjectId::Fern,
            root: PathBuf::from("data/nerf_llff_data"),
            split: Split::Train,
            color_bkgd_aug: BackgroundMode::default(),
            num_rays: None,
            near: 1.0,
            far: 6.0,
            batch_over_images: true,
            factor: Some(4),
            width: None,
            height: None,
            sampling_type: SamplingType::default(),
            bd_factor: Some(0.75),
            recenter: true,
            spherify: false,
            path_zflat: false,
            ndc_near: 1.0,
            opengl_camera: true,
            seed: None,
            min_fraction: 0.1,
            loss_min_fraction: 0.1,
        }
    }
}

impl SubjectConfig {
    /// Parse a JSON config; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> TrainResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> TrainResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Training mode needs a ray budget and the training split.
    pub fn is_training(&self) -> bool {
        self.num_rays.is_some() && self.split == Split::Train
    }

    pub fn camera_convention(&self) -> CameraConvention {
        if self.opengl_camera {
            CameraConvention::OpenGl
        } else {
            CameraConvention::OpenCv
        }
    }

    pub fn image_resolution(&self) -> ImageResolution {
        match (self.factor, self.height, self.width) {
            (Some(f), _, _) => ImageResolution::Factor(f),
            (None, Some(h), _) => ImageResolution::Height(h),
            (None, None, Some(w)) => ImageResolution::Width(w),
            (None, None, None) => ImageResolution::Native,
        }
    }

    pub fn llff_options(&self) -> LlffOptions {
        LlffOptions {
            resolution: self.image_resolution(),
            bd_factor: self.bd_factor,
            recenter: self.recenter,
            spherify: self.spherify,
            path_zflat: self.path_zflat,
        }
    }

    /// Reject values no loader can work with.
    pub fn validate(&self) -> TrainResult<()> {
        let invalid = |msg: String| Err(TrainError::InvalidConfiguration(msg));
        if self.num_rays == Some(0) {
            return invalid("num_rays must be positive".into());
        }
        if !(self.near > 0.0) || !(self.far > self.near) {
            return invalid(format!(
                "expected 0 < near < far, got near {} far {}",
                self.near, self.far
            ));
        }
        if !(self.ndc_near > 0.0) {
            return invalid(format!("ndc_near must be positive, got {}", self.ndc_near));
        }
        if let Some(bd) = self.bd_factor {
            if !(bd > 0.0) {
                return invalid(format!("bd_factor must be positive, got {bd}"));
            }
        }
        for (name, value) in [
            ("min_fraction", self.min_fraction),
            ("loss_min_fraction", self.loss_min_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must lie in [0, 1], got {value}"));
            }
        }
        if self.sampling_type == SamplingType::Learned && !self.is_training() {
            return invalid("learned sampling requires training mode".into());
        }
        Ok(())
    }
}
