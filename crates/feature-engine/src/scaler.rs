//! Z-score feature scaling

use crate::statistics::StatisticalFeatures;
use crate::PreprocessError;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use telemetry::SensorFrame;
use tracing::{debug, info};

/// Fitted per-feature normalization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    /// Feature order used at fit time
    pub features: Vec<String>,
    /// Per-feature mean
    pub means: Vec<f64>,
    /// Per-feature scale (population standard deviation, 1.0 for constant features)
    pub std_devs: Vec<f64>,
    /// Number of frames seen at fit time
    pub n_samples: usize,
}

/// Standard scaler over the configured feature columns.
///
/// Timestamps and status labels are never part of the feature matrix.
#[derive(Debug, Clone)]
pub struct Scaler {
    features: Vec<String>,
    state: Option<ScalerState>,
}

impl Scaler {
    /// Create an unfitted scaler for the given feature order
    pub fn new(features: Vec<String>) -> Self {
        Self {
            features,
            state: None,
        }
    }

    /// Rebuild a fitted scaler from persisted parameters
    pub fn from_state(state: ScalerState) -> Self {
        Self {
            features: state.features.clone(),
            state: Some(state),
        }
    }

    /// Fit normalization parameters, replacing any previous state
    pub fn fit(&mut self, frames: &[SensorFrame]) -> Result<&ScalerState, PreprocessError> {
        let state = self.compute_state(frames)?;
        Ok(self.state.insert(state))
    }

    /// Normalize frames into an `(n_frames, n_features)` matrix
    pub fn transform(&self, frames: &[SensorFrame]) -> Result<Array2<f64>, PreprocessError> {
        let state = self.state.as_ref().ok_or(PreprocessError::NotFitted)?;
        if state.features != self.features {
            return Err(PreprocessError::FeatureMismatch {
                fitted: state.features.clone(),
                configured: self.features.clone(),
            });
        }
        Self::apply(state, frames)
    }

    /// Fit then transform the same frames; state is replaced once, on success
    pub fn fit_transform(
        &mut self,
        frames: &[SensorFrame],
    ) -> Result<Array2<f64>, PreprocessError> {
        let state = self.compute_state(frames)?;
        let scaled = Self::apply(&state, frames)?;
        self.state = Some(state);
        Ok(scaled)
    }

    /// Fitted parameters, if any
    pub fn state(&self) -> Option<&ScalerState> {
        self.state.as_ref()
    }

    /// Whether the scaler has been fitted
    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Configured feature order
    pub fn features(&self) -> &[String] {
        &self.features
    }

    fn compute_state(&self, frames: &[SensorFrame]) -> Result<ScalerState, PreprocessError> {
        if frames.is_empty() {
            return Err(PreprocessError::EmptyInput);
        }
        let columns = extract_columns(&self.features, frames)?;

        let mut means = Vec::with_capacity(self.features.len());
        let mut std_devs = Vec::with_capacity(self.features.len());
        for column in columns {
            let stats = StatisticalFeatures::compute(column);
            means.push(stats.mean);
            std_devs.push(if stats.std_dev > 0.0 { stats.std_dev } else { 1.0 });
        }

        info!(
            "Fitted scaler on {} frames x {} features",
            frames.len(),
            self.features.len()
        );
        Ok(ScalerState {
            features: self.features.clone(),
            means,
            std_devs,
            n_samples: frames.len(),
        })
    }

    fn apply(state: &ScalerState, frames: &[SensorFrame]) -> Result<Array2<f64>, PreprocessError> {
        let n_features = state.features.len();
        let mut scaled = Array2::zeros((frames.len(), n_features));

        for (i, frame) in frames.iter().enumerate() {
            for (j, feature) in state.features.iter().enumerate() {
                let value = frame
                    .value(feature)
                    .ok_or_else(|| PreprocessError::MissingFeature {
                        feature: feature.clone(),
                        index: i,
                    })?;
                scaled[[i, j]] = (value - state.means[j]) / state.std_devs[j];
            }
        }

        debug!("Transformed {} frames", frames.len());
        Ok(scaled)
    }
}

fn extract_columns(
    features: &[String],
    frames: &[SensorFrame],
) -> Result<Vec<Vec<f64>>, PreprocessError> {
    features
        .iter()
        .map(|feature| {
            frames
                .iter()
                .enumerate()
                .map(|(index, frame)| {
                    frame.value(feature).ok_or_else(|| PreprocessError::MissingFeature {
                        feature: feature.clone(),
                        index,
                    })
                })
                .collect()
        })
        .collect()
}
