//! Pluggable model capabilities
//!
//! Each sub-model of the ensemble is a strategy behind a fixed contract.
//! The default implementations live in the sibling modules.

mod forest;
mod isolation;
mod sequence;

pub use forest::RandomForest;
pub use isolation::IsolationForest;
pub use sequence::TemporalClassifier;

use crate::InferenceError;
use ndarray::{Array1, Array2, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use telemetry::PipelineConfig;

/// Label returned by an anomaly model for an inlier
pub const INLIER: i8 = 1;
/// Label returned by an anomaly model for an outlier
pub const OUTLIER: i8 = -1;

/// Per-epoch training curve of a sequence model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    /// Empty when no validation samples were held out
    pub val_loss: Vec<f64>,
    /// Empty when no validation samples were held out
    pub val_accuracy: Vec<f64>,
}

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }
}

/// Classifier over `(n, sequence_length, n_features)` window tensors
pub trait SequenceModel {
    /// Train on labelled windows, returning the per-epoch curve
    fn fit(&mut self, x: ArrayView3<f64>, y: &[bool]) -> Result<TrainingHistory, InferenceError>;

    /// Positive-class probability per window, each in `[0, 1]`
    fn predict(&self, x: ArrayView3<f64>) -> Result<Array1<f64>, InferenceError>;
}

/// Classifier over flattened `(n, sequence_length * n_features)` windows
pub trait TreeModel {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[bool]) -> Result<(), InferenceError>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<bool>, InferenceError>;

    /// `(n, 2)` class probabilities; column 0 is the negative class
    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, InferenceError>;
}

/// Unsupervised scorer over flattened windows
pub trait AnomalyModel {
    fn fit(&mut self, x: ArrayView2<f64>) -> Result<(), InferenceError>;

    /// [`OUTLIER`] or [`INLIER`] per row
    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<i8>, InferenceError>;
}

/// Construction of an untrained model from the pipeline configuration
pub trait FromPipelineConfig {
    fn from_config(config: &PipelineConfig) -> Self;
}
