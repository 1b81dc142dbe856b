//! Scaler and ensemble trained together

use crate::ensemble::{EnsembleModel, EnsemblePrediction, TrainingMetrics};
use crate::InferenceError;
use feature_engine::Scaler;
use telemetry::{PipelineConfig, SensorFrame};
use tracing::info;

/// Everything needed to score raw frames: the fitted scaler and the ensemble
/// trained on its output. Persisted and restored as one snapshot.
#[derive(Debug)]
pub struct ModelBundle {
    scaler: Scaler,
    ensemble: EnsembleModel,
}

impl ModelBundle {
    /// Untrained bundle for the configured features
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            scaler: Scaler::new(config.feature_list.clone()),
            ensemble: EnsembleModel::new(config),
        }
    }

    /// Bundle from a fitted scaler and trained ensemble
    pub fn from_parts(scaler: Scaler, ensemble: EnsembleModel) -> Self {
        Self { scaler, ensemble }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.ensemble.config()
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn ensemble(&self) -> &EnsembleModel {
        &self.ensemble
    }

    pub fn is_trained(&self) -> bool {
        self.ensemble.is_trained() && self.scaler.is_fitted()
    }

    /// Per-frame training labels: frames whose status is the configured
    /// maintenance label are positive
    pub fn labels(&self, frames: &[SensorFrame]) -> Vec<bool> {
        let label = &self.config().maintenance_label;
        frames.iter().map(|frame| frame.has_status(label)).collect()
    }

    /// Fit the scaler on the frames, then train the ensemble on the scaled
    /// matrix with status-derived labels
    pub fn train(&mut self, frames: &[SensorFrame]) -> Result<TrainingMetrics, InferenceError> {
        let required = self.config().sequence_length + 1;
        if frames.len() < required {
            return Err(InferenceError::InsufficientData {
                required,
                actual: frames.len(),
            });
        }

        let labels = self.labels(frames);
        info!(
            "Training on {} frames, {} labelled '{}'",
            frames.len(),
            labels.iter().filter(|&&l| l).count(),
            self.config().maintenance_label
        );
        let scaled = self.scaler.fit_transform(frames)?;
        self.ensemble.train(scaled.view(), &labels)
    }

    /// Score raw frames with the fitted scaler and trained ensemble
    pub fn predict(&self, frames: &[SensorFrame]) -> Result<EnsemblePrediction, InferenceError> {
        if !self.ensemble.is_trained() {
            return Err(InferenceError::NotTrained);
        }
        let scaled = self.scaler.transform(frames)?;
        self.ensemble.predict(scaled.view())
    }

    /// Metrics on the partition held out by the last training run
    pub fn evaluate(&self) -> Result<TrainingMetrics, InferenceError> {
        self.ensemble.evaluate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;
    use telemetry::{AnomalyModelConfig, SequenceModelConfig, TreeModelConfig};

    fn config() -> PipelineConfig {
        PipelineConfig {
            feature_list: vec!["temperature".to_string(), "pressure".to_string()],
            sequence_length: 3,
            sequence_model: SequenceModelConfig {
                epochs: 3,
                ..SequenceModelConfig::default()
            },
            tree_model: TreeModelConfig {
                n_trees: 5,
                max_depth: Some(3),
            },
            anomaly_model: AnomalyModelConfig {
                n_trees: 10,
                ..AnomalyModelConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    fn frames(n: usize) -> Vec<SensorFrame> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let mut values = BTreeMap::new();
                values.insert("temperature".to_string(), 60.0 + (i % 5) as f64);
                values.insert("pressure".to_string(), 2.0 - (i % 3) as f64 * 0.1);
                let status = if i % 4 == 0 { "maintenance" } else { "operational" };
                SensorFrame::new(start + Duration::seconds(5 * i as i64), values)
                    .with_status(status)
            })
            .collect()
    }

    #[test]
    fn test_labels_from_status() {
        let bundle = ModelBundle::new(config());
        assert_eq!(
            bundle.labels(&frames(5)),
            vec![true, false, false, false, true]
        );
    }

    #[test]
    fn test_untrained_bundle() {
        let bundle = ModelBundle::new(config());
        assert!(!bundle.is_trained());
        assert!(matches!(bundle.predict(&frames(5)), Err(InferenceError::NotTrained)));
        assert!(matches!(bundle.evaluate(), Err(InferenceError::NotTrained)));
    }

    #[test]
    fn test_train_needs_sequence_plus_one() {
        let mut bundle = ModelBundle::new(config());
        assert!(matches!(
            bundle.train(&frames(3)),
            Err(InferenceError::InsufficientData {
                required: 4,
                actual: 3
            })
        ));
        assert!(!bundle.scaler().is_fitted());
    }

    #[test]
    fn test_train_then_predict() {
        let mut bundle = ModelBundle::new(config());
        let metrics = bundle.train(&frames(30)).unwrap();
        assert!(bundle.is_trained());
        assert_eq!(metrics.test_samples, 6);

        let prediction = bundle.predict(&frames(10)).unwrap();
        assert_eq!(prediction.len(), 8);
    }
}
