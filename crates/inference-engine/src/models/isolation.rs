//! Isolation Forest anomaly scorer

use super::{AnomalyModel, FromPipelineConfig, INLIER, OUTLIER};
use crate::InferenceError;
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use telemetry::{AnomalyModelConfig, PipelineConfig};
use tracing::info;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
}

impl IsolationNode {
    fn build(
        x: ArrayView2<f64>,
        rows: &[usize],
        depth: usize,
        height_limit: usize,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        if depth >= height_limit || rows.len() <= 1 {
            return IsolationNode::Leaf { size: rows.len() };
        }

        // Only columns with spread can split this node
        let candidates: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|feature| {
                let (min, max) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &r| {
                    let v = x[[r, feature]];
                    (lo.min(v), hi.max(v))
                });
                (max > min).then_some((feature, min, max))
            })
            .collect();
        if candidates.is_empty() {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| x[[r, feature]] < threshold);

        IsolationNode::Split {
            feature,
            threshold,
            left: Box::new(Self::build(x, &left, depth + 1, height_limit, rng)),
            right: Box::new(Self::build(x, &right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Isolation forest with a contamination-quantile decision threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    config: AnomalyModelConfig,
    seed: u64,
    trees: Vec<IsolationNode>,
    /// Sub-sample size the trees were grown on
    sample_size: usize,
    /// Scores above this are outliers
    threshold: Option<f64>,
    n_features: usize,
}

impl IsolationForest {
    pub fn new(config: AnomalyModelConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            trees: Vec::new(),
            sample_size: 0,
            threshold: None,
            n_features: 0,
        }
    }

    /// Anomaly score in `(0, 1]`; higher is more anomalous
    pub fn score_samples(&self, x: ArrayView2<f64>) -> Result<Vec<f64>, InferenceError> {
        if self.trees.is_empty() {
            return Err(InferenceError::NotTrained);
        }
        if x.ncols() != self.n_features {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{} columns", self.n_features),
                actual: format!("{} columns", x.ncols()),
            });
        }

        let normalizer = average_path_length(self.sample_size).max(f64::EPSILON);
        let trees = self.trees.len() as f64;
        Ok(x.axis_iter(Axis(0))
            .map(|row| {
                let mean_path =
                    self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / trees;
                2f64.powf(-mean_path / normalizer)
            })
            .collect())
    }

    /// Decision threshold learned at fit time
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }
}

impl FromPipelineConfig for IsolationForest {
    fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.anomaly_model.clone(), config.random_seed)
    }
}

impl AnomalyModel for IsolationForest {
    fn fit(&mut self, x: ArrayView2<f64>) -> Result<(), InferenceError> {
        let n_samples = x.nrows();
        if n_samples == 0 {
            return Err(InferenceError::TrainingFailed(
                "anomaly model needs at least one sample".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let sample_size = self.config.max_samples.min(n_samples);
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        self.trees = (0..self.config.n_trees)
            .map(|_| {
                let rows = sample(&mut rng, n_samples, sample_size).into_vec();
                IsolationNode::build(x, &rows, 0, height_limit, &mut rng)
            })
            .collect();
        self.sample_size = sample_size;
        self.n_features = x.ncols();

        let mut scores = self.score_samples(x)?;
        scores.sort_by(|a, b| a.total_cmp(b));
        let threshold = quantile(&scores, 1.0 - self.config.contamination);
        self.threshold = Some(threshold);

        info!(
            "Fitted isolation forest: {} trees, sample size {}, threshold {:.4}",
            self.trees.len(),
            sample_size,
            threshold
        );
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<i8>, InferenceError> {
        let threshold = self.threshold.ok_or(InferenceError::NotTrained)?;
        Ok(self
            .score_samples(x)?
            .into_iter()
            .map(|score| if score > threshold { OUTLIER } else { INLIER })
            .collect())
    }
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{concatenate, Array2};

    fn inliers(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 3), |(i, j)| ((i * 7 + j * 3) % 11) as f64 * 0.1)
    }

    fn forest() -> IsolationForest {
        IsolationForest::new(
            AnomalyModelConfig {
                n_trees: 50,
                max_samples: 64,
                contamination: 0.1,
            },
            42,
        )
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }

    #[test]
    fn test_quantile() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&sorted, 0.0), 1.0);
        assert_eq!(quantile(&sorted, 0.5), 3.0);
        assert!((quantile(&sorted, 0.9) - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_scores_higher() {
        let mut model = forest();
        let train = inliers(200);
        model.fit(train.view()).unwrap();

        let outlier = Array2::from_elem((1, 3), 25.0);
        let queries = concatenate![ndarray::Axis(0), train.slice(ndarray::s![0..1, ..]), outlier];
        let scores = model.score_samples(queries.view()).unwrap();
        assert!(scores[1] > scores[0]);
        assert_eq!(model.predict(outlier.view()).unwrap(), vec![OUTLIER]);
    }

    #[test]
    fn test_labels_are_signed_units() {
        let mut model = forest();
        let train = inliers(120);
        model.fit(train.view()).unwrap();

        let labels = model.predict(train.view()).unwrap();
        assert!(labels.iter().all(|&l| l == INLIER || l == OUTLIER));
        let outliers = labels.iter().filter(|&&l| l == OUTLIER).count();
        assert!(outliers <= 120 / 5, "{outliers} flagged");
    }

    #[test]
    fn test_deterministic_for_seed() {
        let train = inliers(100);
        let mut a = forest();
        let mut b = forest();
        a.fit(train.view()).unwrap();
        b.fit(train.view()).unwrap();
        assert_eq!(
            a.score_samples(train.view()).unwrap(),
            b.score_samples(train.view()).unwrap()
        );
    }

    #[test]
    fn test_not_trained_and_shape() {
        let model = forest();
        assert!(matches!(
            model.predict(inliers(2).view()),
            Err(InferenceError::NotTrained)
        ));

        let mut model = forest();
        model.fit(inliers(20).view()).unwrap();
        assert!(matches!(
            model.predict(Array2::zeros((1, 5)).view()),
            Err(InferenceError::InvalidInputShape { .. })
        ));
    }
}
