//! Maintenance Inference Engine
//!
//! Trains and runs the three-model ensemble (sequence classifier, tree
//! classifier, anomaly scorer) over windows of scaled sensor frames.

mod bundle;
mod ensemble;
mod metrics;
pub mod models;

pub use bundle::ModelBundle;
pub use ensemble::{
    holdout_split, sequence_confidence, EnsembleModel, EnsemblePrediction, TrainingMetrics,
};
pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix, ModelEvaluation};
pub use models::{IsolationForest, RandomForest, TemporalClassifier, TrainingHistory};

use feature_engine::PreprocessError;
use thiserror::Error;

/// Errors during training and inference
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model has not been trained")]
    NotTrained,
    #[error("Insufficient data: need at least {required} frames, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
    #[error("Training failed: {0}")]
    TrainingFailed(String),
    #[error("Prediction failed: {0}")]
    PredictionFailed(String),
    #[error("No held-out data to evaluate; use evaluate_on with a labelled batch")]
    NoEvaluationData,
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}
