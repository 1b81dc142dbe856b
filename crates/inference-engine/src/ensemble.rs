//! Three-model maintenance ensemble

use crate::metrics::ModelEvaluation;
use crate::models::{
    AnomalyModel, FromPipelineConfig, IsolationForest, RandomForest, SequenceModel,
    TemporalClassifier, TrainingHistory, TreeModel,
};
use crate::InferenceError;
use chrono::{DateTime, Utc};
use feature_engine::{SequenceWindower, WindowBatch};
use ndarray::ArrayView2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use telemetry::PipelineConfig;
use tracing::{debug, info, warn};

/// Share of windows held out for evaluation
const TEST_FRACTION: f64 = 0.2;

/// Held-out evaluation of the supervised models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub sequence_model: ModelEvaluation,
    pub tree_model: ModelEvaluation,
    /// Sequence model training curve
    pub history: TrainingHistory,
    /// Windows in the evaluation partition
    pub test_samples: usize,
}

/// Raw, unfused per-window outputs of all three models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    /// Positive-class probability from the sequence model
    pub sequence_probabilities: Vec<f64>,
    /// `|p - 0.5| * 2`
    pub sequence_confidence: Vec<f64>,
    pub tree_predictions: Vec<bool>,
    /// Largest class probability from the tree model
    pub tree_confidence: Vec<f64>,
    /// `-1` anomaly, `1` normal
    pub anomalies: Vec<i8>,
    pub timestamp: DateTime<Utc>,
}

impl EnsemblePrediction {
    fn empty() -> Self {
        Self {
            sequence_probabilities: Vec::new(),
            sequence_confidence: Vec::new(),
            tree_predictions: Vec::new(),
            tree_confidence: Vec::new(),
            anomalies: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Number of windows predicted
    pub fn len(&self) -> usize {
        self.sequence_probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Windows where either supervised model predicts maintenance with at
    /// least `threshold` confidence
    pub fn maintenance_flags(&self, threshold: f64) -> Vec<bool> {
        (0..self.len())
            .map(|i| {
                let sequence = self.sequence_probabilities[i] > 0.5
                    && self.sequence_confidence[i] >= threshold;
                let tree = self.tree_predictions[i] && self.tree_confidence[i] >= threshold;
                sequence || tree
            })
            .collect()
    }
}

/// Confidence of a binary probability, in `[0, 1]`
pub fn sequence_confidence(probability: f64) -> f64 {
    ((probability - 0.5).abs() * 2.0).clamp(0.0, 1.0)
}

/// Seeded train/test split over `n` windows, both halves in ascending order.
///
/// The test half takes `ceil(n * 0.2)` windows, capped so at least one
/// window is left for training.
pub fn holdout_split(n: usize, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let n_test = ((n as f64 * TEST_FRACTION).ceil() as usize).min(n.saturating_sub(1));
    let mut test = indices.split_off(indices.len() - n_test);
    indices.sort_unstable();
    test.sort_unstable();
    (indices, test)
}

fn batch_labels(batch: &WindowBatch) -> Result<&[bool], InferenceError> {
    batch
        .labels
        .as_deref()
        .ok_or_else(|| InferenceError::InvalidInputShape {
            expected: "labelled windows".to_string(),
            actual: "unlabelled windows".to_string(),
        })
}

/// Sequence, tree and anomaly models trained on one shared window split.
///
/// Untrained until [`train`](Self::train) succeeds; a failed retrain leaves
/// the ensemble untrained.
#[derive(Debug)]
pub struct EnsembleModel<S = TemporalClassifier, T = RandomForest, A = IsolationForest> {
    config: PipelineConfig,
    sequence_model: S,
    tree_model: T,
    anomaly_model: A,
    trained_at: Option<DateTime<Utc>>,
    history: Option<TrainingHistory>,
    holdout: Option<WindowBatch>,
}

impl<S, T, A> EnsembleModel<S, T, A>
where
    S: SequenceModel + FromPipelineConfig,
    T: TreeModel + FromPipelineConfig,
    A: AnomalyModel + FromPipelineConfig,
{
    /// Untrained ensemble built from the configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            sequence_model: S::from_config(&config),
            tree_model: T::from_config(&config),
            anomaly_model: A::from_config(&config),
            config,
            trained_at: None,
            history: None,
            holdout: None,
        }
    }
}

impl<S, T, A> EnsembleModel<S, T, A>
where
    S: SequenceModel,
    T: TreeModel,
    A: AnomalyModel,
{
    /// Trained ensemble from previously fitted models
    pub fn from_trained(
        config: PipelineConfig,
        sequence_model: S,
        tree_model: T,
        anomaly_model: A,
        trained_at: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            sequence_model,
            tree_model,
            anomaly_model,
            trained_at: Some(trained_at),
            history: None,
            holdout: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.trained_at.is_some()
    }

    /// Completion time of the last successful training
    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    /// Training curve of the last in-process training
    pub fn history(&self) -> Option<&TrainingHistory> {
        self.history.as_ref()
    }

    pub fn sequence_model(&self) -> &S {
        &self.sequence_model
    }

    pub fn tree_model(&self) -> &T {
        &self.tree_model
    }

    pub fn anomaly_model(&self) -> &A {
        &self.anomaly_model
    }

    /// Train all three models on scaled frames and their per-frame labels.
    ///
    /// Needs at least `sequence_length + 1` frames. Windows are split once
    /// with the configured seed; the supervised models are evaluated on the
    /// held-out part and the anomaly model is fitted on the training part.
    pub fn train<'a>(
        &mut self,
        scaled: ArrayView2<'a, f64>,
        labels: &'a [bool],
    ) -> Result<TrainingMetrics, InferenceError> {
        let required = self.config.sequence_length + 1;
        if scaled.nrows() < required {
            return Err(InferenceError::InsufficientData {
                required,
                actual: scaled.nrows(),
            });
        }
        let batch = SequenceWindower::new(self.config.sequence_length)
            .training(scaled, labels)?
            .collect_batch();

        if self.is_trained() {
            info!("Retraining ensemble; previous state discarded");
        }
        self.trained_at = None;
        self.history = None;
        self.holdout = None;

        let (train_idx, test_idx) = holdout_split(batch.len(), self.config.random_seed);
        let train = batch.select(&train_idx);
        let test = batch.select(&test_idx);
        let y_train = batch_labels(&train)?;
        info!(
            "Training ensemble on {} windows ({} train / {} test)",
            batch.len(),
            train.len(),
            test.len()
        );

        let history = self.sequence_model.fit(train.x.view(), y_train)?;
        let flat = train.flatten();
        self.tree_model.fit(flat.view(), y_train)?;
        self.anomaly_model.fit(flat.view())?;

        self.trained_at = Some(Utc::now());
        self.history = Some(history);
        let metrics = self.evaluate_on(&test)?;
        self.holdout = Some(test);

        info!(
            "Ensemble trained: sequence accuracy {:.3}, tree accuracy {:.3}",
            metrics.sequence_model.report.accuracy,
            metrics.tree_model.report.accuracy
        );
        Ok(metrics)
    }

    /// Evaluate on the partition held out by the last training run
    pub fn evaluate(&self) -> Result<TrainingMetrics, InferenceError> {
        if !self.is_trained() {
            return Err(InferenceError::NotTrained);
        }
        let holdout = self.holdout.as_ref().ok_or(InferenceError::NoEvaluationData)?;
        self.evaluate_on(holdout)
    }

    /// Evaluate the supervised models on an arbitrary labelled batch
    pub fn evaluate_on(&self, batch: &WindowBatch) -> Result<TrainingMetrics, InferenceError> {
        if !self.is_trained() {
            return Err(InferenceError::NotTrained);
        }
        let truth = batch_labels(batch)?;
        if batch.is_empty() {
            warn!("Evaluating on an empty batch");
        }

        let prediction = self.predict_batch(batch)?;
        let sequence_predicted: Vec<bool> = prediction
            .sequence_probabilities
            .iter()
            .map(|&p| p > 0.5)
            .collect();

        Ok(TrainingMetrics {
            sequence_model: ModelEvaluation::new(truth, &sequence_predicted),
            tree_model: ModelEvaluation::new(truth, &prediction.tree_predictions),
            history: self.history.clone().unwrap_or_default(),
            test_samples: batch.len(),
        })
    }

    /// Run every model over the inference windows of scaled frames
    pub fn predict(&self, scaled: ArrayView2<f64>) -> Result<EnsemblePrediction, InferenceError> {
        if !self.is_trained() {
            return Err(InferenceError::NotTrained);
        }
        let batch = SequenceWindower::new(self.config.sequence_length)
            .inference(scaled)
            .collect_batch();
        self.predict_batch(&batch)
    }

    /// Run every model over prepared windows
    pub fn predict_batch(&self, batch: &WindowBatch) -> Result<EnsemblePrediction, InferenceError> {
        if !self.is_trained() {
            return Err(InferenceError::NotTrained);
        }
        if batch.is_empty() {
            debug!("No complete window to predict");
            return Ok(EnsemblePrediction::empty());
        }
        let expected = (self.config.sequence_length, self.config.num_features());
        let actual = (batch.sequence_length(), batch.num_features());
        if actual != expected {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{:?} windows", expected),
                actual: format!("{:?} windows", actual),
            });
        }

        let sequence_probabilities = self.sequence_model.predict(batch.x.view())?;
        let flat = batch.flatten();
        let tree_predictions = self.tree_model.predict(flat.view())?;
        let tree_confidence = self
            .tree_model
            .predict_proba(flat.view())?
            .outer_iter()
            .map(|row| row.iter().cloned().fold(0.0, f64::max))
            .collect();
        let anomalies = self.anomaly_model.predict(flat.view())?;

        debug!("Predicted {} windows", batch.len());
        Ok(EnsemblePrediction {
            sequence_confidence: sequence_probabilities
                .iter()
                .map(|&p| sequence_confidence(p))
                .collect(),
            sequence_probabilities: sequence_probabilities.to_vec(),
            tree_predictions,
            tree_confidence,
            anomalies,
            timestamp: Utc::now(),
        })
    }
}
