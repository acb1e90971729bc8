//! Lumen Data Crate
//!
//! Loading and normalization of multi-view LLFF captures: the packed pose
//! archive, camera pose types, pose normalization (recentering, spherify,
//! render paths) and the train/test split. This crate is renderer-agnostic
//! and only deals with data and camera geometry.

pub mod archive;
pub mod error;
pub mod llff;
pub mod poses;
pub mod types;

pub use archive::{ArchiveRow, encode_pose_archive, parse_pose_archive, read_pose_archive};
pub use error::{DataError, DataResult};
pub use llff::{ImageResolution, LlffDataset, LlffOptions, Split, SplitIndices, load_llff_data};
pub use poses::{SpiralParams, Spherified, average_pose, recenter, spherify, spiral_path};
pub use types::{Bounds, CameraPose, HomogeneousTransform, Intrinsics, PathKind, RenderPath};
