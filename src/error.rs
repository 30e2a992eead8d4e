use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures that make a whole detection call meaningless.
#[derive(Debug, Error)]
pub enum Error {
    #[error("model at {path:?} is unavailable: {reason}")]
    ResourceUnavailable { path: PathBuf, reason: String },
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    #[error("score map shape {scores:?} does not match geometry map shape {geometry:?}")]
    ShapeMismatch {
        scores: Vec<usize>,
        geometry: Vec<usize>,
    },
    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ResourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures scoped to a single region. These never abort a batch, the region just reads as
/// an empty string.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region has no area after clamping")]
    Degenerate,
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
}
