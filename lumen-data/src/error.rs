//! Error types for dataset loading and pose normalization.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or normalizing a dataset.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Mismatch between images ({images}) and poses ({poses})")]
    DatasetMismatch { images: usize, poses: usize },

    #[error("Resized image directory {0} does not exist")]
    MissingResolution(PathBuf),

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Malformed pose archive: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),
}

pub type DataResult<T> = Result<T, DataError>;
