//! Hydro Station Maintenance Pipeline
//!
//! Validates incoming frames, trains and runs the model bundle, schedules
//! retraining and persists snapshots.

use chrono::{DateTime, Utc};
use inference_engine::{EnsemblePrediction, InferenceError, ModelBundle, TrainingMetrics};
use model_store::{PersistenceManager, StoreError};
use sensor_sim::TransportError;
use serde::Serialize;
use telemetry::{ConfigError, FrameError, PipelineConfig, SensorFrame, Validator};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid frame {index}: {source}")]
    Frame { index: usize, source: FrameError },
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Install the global fmt subscriber; level from `RUST_LOG`, `info` otherwise
pub fn init_logging() -> Result<(), PipelineError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| PipelineError::Logging(e.to_string()))
}

/// A reading outside its channel's absolute limits
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutOfRangeReading {
    /// Index of the frame in the submitted batch
    pub frame: usize,
    pub channel: String,
    pub value: f64,
}

/// Ensemble outputs plus the windows flagged for maintenance
#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport {
    #[serde(flatten)]
    pub prediction: EnsemblePrediction,
    /// Indices of windows where a supervised model predicts maintenance at
    /// or above the confidence threshold
    pub flagged_windows: Vec<usize>,
    /// Readings outside the channel catalog limits; scored, not rejected
    pub out_of_range: Vec<OutOfRangeReading>,
}

/// Owns one model bundle and the frame checks in front of it
pub struct MaintenancePipeline {
    bundle: ModelBundle,
    validator: Validator,
}

impl MaintenancePipeline {
    /// Untrained pipeline
    pub fn new(config: PipelineConfig) -> Self {
        Self::from_bundle(ModelBundle::new(config))
    }

    pub fn from_bundle(bundle: ModelBundle) -> Self {
        Self {
            bundle,
            validator: Validator::default(),
        }
    }

    /// Restore a pipeline from a saved snapshot
    pub fn load(store: &PersistenceManager) -> Result<Self, PipelineError> {
        Ok(Self::from_bundle(store.load()?))
    }

    pub fn save(&self, store: &PersistenceManager) -> Result<(), PipelineError> {
        store.save(&self.bundle)?;
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        self.bundle.config()
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn is_trained(&self) -> bool {
        self.bundle.is_trained()
    }

    pub fn last_training_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.ensemble().trained_at()
    }

    /// True when untrained or the retrain interval has elapsed since the
    /// last training
    pub fn needs_retrain(&self, now: DateTime<Utc>) -> bool {
        let Some(trained_at) = self.last_training_time() else {
            return true;
        };
        let interval = self.config().retrain_interval.as_duration();
        (now - trained_at)
            .to_std()
            .map(|elapsed| elapsed >= interval)
            .unwrap_or(false)
    }

    /// Check channel names against the feature list and reject non-finite
    /// values. Readings outside the channel limits are logged and returned.
    pub fn validate_frames(
        &self,
        frames: &[SensorFrame],
    ) -> Result<Vec<OutOfRangeReading>, PipelineError> {
        let features = &self.config().feature_list;
        let mut out_of_range = Vec::new();
        for (index, frame) in frames.iter().enumerate() {
            Validator::check_channels(frame, features)
                .and_then(|()| Validator::check_finite(frame))
                .map_err(|source| PipelineError::Frame { index, source })?;
            for error in self.validator.validate_frame(frame).errors {
                if let FrameError::OutOfRange { channel, value, min, max } = error {
                    warn!(
                        "Frame {} at {}: {} = {} outside [{}, {}]",
                        index, frame.timestamp, channel, value, min, max
                    );
                    out_of_range.push(OutOfRangeReading {
                        frame: index,
                        channel,
                        value,
                    });
                }
            }
        }
        debug!(
            "Validated {} frames, {} readings out of range",
            frames.len(),
            out_of_range.len()
        );
        Ok(out_of_range)
    }

    /// Validate and train; labels come from each frame's status
    pub fn train(&mut self, frames: &[SensorFrame]) -> Result<TrainingMetrics, PipelineError> {
        self.validate_frames(frames)?;
        let metrics = self.bundle.train(frames)?;
        info!(
            "Training complete; next retrain due after {}",
            self.config().retrain_interval
        );
        Ok(metrics)
    }

    /// Validate and score frames
    pub fn predict(&self, frames: &[SensorFrame]) -> Result<PredictionReport, PipelineError> {
        let out_of_range = self.validate_frames(frames)?;
        let prediction = self.bundle.predict(frames)?;
        let flagged_windows: Vec<usize> = prediction
            .maintenance_flags(self.config().confidence_threshold)
            .into_iter()
            .enumerate()
            .filter_map(|(i, flagged)| flagged.then_some(i))
            .collect();
        if !flagged_windows.is_empty() {
            info!(
                "{} of {} windows flagged for maintenance",
                flagged_windows.len(),
                prediction.len()
            );
        }
        Ok(PredictionReport {
            prediction,
            flagged_windows,
            out_of_range,
        })
    }

    pub fn evaluate(&self) -> Result<TrainingMetrics, PipelineError> {
        Ok(self.bundle.evaluate()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sensor_sim::SyntheticSensorGenerator;
    use telemetry::{AnomalyModelConfig, SequenceModelConfig, TreeModelConfig, MAINTENANCE_STATUS};

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            sequence_length: 5,
            sequence_model: SequenceModelConfig {
                epochs: 4,
                ..SequenceModelConfig::default()
            },
            tree_model: TreeModelConfig {
                n_trees: 6,
                max_depth: Some(4),
            },
            anomaly_model: AnomalyModelConfig {
                n_trees: 10,
                ..AnomalyModelConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    /// Simulated frames; injected anomalies are labelled as maintenance
    fn frames(n: usize, seed: u64) -> Vec<SensorFrame> {
        let mut generator = SyntheticSensorGenerator::hydro(seed);
        let start = Utc::now() - Duration::hours(1);
        (0..n)
            .map(|i| {
                let generated =
                    generator.generate_at(start + Duration::seconds(5 * i as i64), i % 4 == 0);
                if generated.is_anomalous() {
                    generated.frame.with_status(MAINTENANCE_STATUS)
                } else {
                    generated.frame
                }
            })
            .collect()
    }

    #[test]
    fn test_ten_frames_insufficient_for_default_window() {
        let mut pipeline = MaintenancePipeline::new(PipelineConfig::default());
        assert!(matches!(
            pipeline.train(&frames(10, 1)),
            Err(PipelineError::Inference(InferenceError::InsufficientData {
                required: 49,
                actual: 10
            }))
        ));
        assert!(!pipeline.is_trained());
    }

    #[test]
    fn test_untrained_pipeline() {
        let pipeline = MaintenancePipeline::new(small_config());
        assert!(pipeline.needs_retrain(Utc::now()));
        assert!(matches!(
            pipeline.predict(&frames(10, 2)),
            Err(PipelineError::Inference(InferenceError::NotTrained))
        ));
        assert!(matches!(
            pipeline.evaluate(),
            Err(PipelineError::Inference(InferenceError::NotTrained))
        ));
    }

    #[test]
    fn test_frame_validation() {
        let pipeline = MaintenancePipeline::new(small_config());
        let mut batch = frames(3, 3);

        batch[1].values.insert("humidity".to_string(), 40.0);
        assert!(matches!(
            pipeline.validate_frames(&batch),
            Err(PipelineError::Frame {
                index: 1,
                source: FrameError::UnknownChannel(_)
            })
        ));

        batch[1].values.remove("humidity");
        batch[2].values.insert("pressure".to_string(), 9.5);
        assert_eq!(
            pipeline.validate_frames(&batch).unwrap(),
            vec![OutOfRangeReading {
                frame: 2,
                channel: "pressure".to_string(),
                value: 9.5,
            }]
        );

        batch[0].values.insert("flow_rate".to_string(), f64::INFINITY);
        assert!(matches!(
            pipeline.validate_frames(&batch),
            Err(PipelineError::Frame {
                index: 0,
                source: FrameError::NonFinite { .. }
            })
        ));
        batch[0].values.insert("flow_rate".to_string(), 100.0);

        batch[2].values.remove("vibration");
        assert!(matches!(
            pipeline.validate_frames(&batch),
            Err(PipelineError::Frame {
                index: 2,
                source: FrameError::MissingChannel(_)
            })
        ));
    }

    #[test]
    fn test_train_predict_persist() {
        let mut pipeline = MaintenancePipeline::new(small_config());
        let history = frames(80, 4);
        let metrics = pipeline.train(&history).unwrap();
        assert_eq!(metrics.test_samples, 15);
        assert!(pipeline.is_trained());

        let now = Utc::now();
        assert!(!pipeline.needs_retrain(now));
        assert!(pipeline.needs_retrain(now + Duration::days(1)));

        let report = pipeline.predict(&history[60..]).unwrap();
        assert_eq!(report.prediction.len(), 16);
        assert!(report
            .prediction
            .sequence_confidence
            .iter()
            .chain(&report.prediction.tree_confidence)
            .all(|c| (0.0..=1.0).contains(c)));
        assert!(report.flagged_windows.iter().all(|&i| i < 16));

        let root = tempfile::tempdir().unwrap();
        let store = PersistenceManager::new(root.path().join("snapshot"));
        pipeline.save(&store).unwrap();
        let restored = MaintenancePipeline::load(&store).unwrap();

        assert_eq!(restored.config(), pipeline.config());
        assert_eq!(restored.last_training_time(), pipeline.last_training_time());
        assert!(!restored.needs_retrain(now));
        assert!(matches!(
            restored.evaluate(),
            Err(PipelineError::Inference(InferenceError::NoEvaluationData))
        ));
        let again = restored.predict(&history[60..]).unwrap();
        assert_eq!(again.flagged_windows, report.flagged_windows);
        assert_eq!(again.prediction.anomalies, report.prediction.anomalies);
    }

    #[test]
    fn test_excursion_is_scored_and_reported() {
        let mut pipeline = MaintenancePipeline::new(small_config());
        let history = frames(80, 5);
        pipeline.train(&history).unwrap();

        let mut recent = history[60..].to_vec();
        recent[19].values.insert("temperature".to_string(), 95.0);
        let report = pipeline.predict(&recent).unwrap();

        assert_eq!(report.prediction.len(), 16);
        assert_eq!(
            report.out_of_range,
            vec![OutOfRangeReading {
                frame: 19,
                channel: "temperature".to_string(),
                value: 95.0,
            }]
        );
    }

    #[test]
    fn test_train_on_simulator_output() {
        // The simulator only publishes operational frames
        let mut generator = SyntheticSensorGenerator::hydro(6);
        let start = Utc::now() - Duration::hours(1);
        let history: Vec<SensorFrame> = (0..60)
            .map(|i| {
                generator
                    .generate_at(start + Duration::seconds(5 * i), i % 10 == 0)
                    .frame
            })
            .collect();

        let mut pipeline = MaintenancePipeline::new(small_config());
        let metrics = pipeline.train(&history).unwrap();
        assert_eq!(metrics.tree_model.report.positive.support, 0);
        assert_eq!(metrics.tree_model.confusion_matrix.total(), 11);

        let report = pipeline.predict(&history[40..]).unwrap();
        assert!(report.prediction.tree_predictions.iter().all(|&p| !p));
        assert!(report.out_of_range.is_empty());
    }
}
