//! Feature Engineering Engine
//!
//! Turns raw sensor frames into normalized feature matrices and slices them
//! into fixed-length windows for the maintenance models.

mod scaler;
mod statistics;
mod windows;

pub use scaler::{Scaler, ScalerState};
pub use statistics::StatisticalFeatures;
pub use windows::{SequenceWindower, Window, WindowBatch, Windows};

use thiserror::Error;

/// Errors during preprocessing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreprocessError {
    #[error("Scaler has not been fitted")]
    NotFitted,
    #[error("Feature order mismatch: fitted on {fitted:?}, configured {configured:?}")]
    FeatureMismatch {
        fitted: Vec<String>,
        configured: Vec<String>,
    },
    #[error("Frame {index} is missing feature '{feature}'")]
    MissingFeature { feature: String, index: usize },
    #[error("Cannot fit scaler on an empty frame set")]
    EmptyInput,
    #[error("Label count {labels} does not match frame count {frames}")]
    LabelMismatch { frames: usize, labels: usize },
}
