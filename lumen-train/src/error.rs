//! Errors raised by the training data pipeline.

use lumen_data::DataError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Config parsing error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

pub type TrainResult<T> = Result<T, TrainError>;
