//! Random-subspace forest of smartcore decision trees

use super::{FromPipelineConfig, TreeModel};
use crate::InferenceError;
use ndarray::{Array2, ArrayView2};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters,
};
use std::fmt;
use telemetry::{PipelineConfig, TreeModelConfig};
use tracing::{debug, info};

type Tree = DecisionTreeClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

/// A fitted tree, or the single class of a bootstrap that held no other
#[derive(Serialize, Deserialize)]
enum Vote {
    Tree(Tree),
    Constant(bool),
}

#[derive(Serialize, Deserialize)]
struct ForestMember {
    /// Column indices this tree was trained on
    features: Vec<usize>,
    vote: Vote,
}

impl ForestMember {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<bool>, InferenceError> {
        match &self.vote {
            Vote::Constant(class) => Ok(vec![*class; x.nrows()]),
            Vote::Tree(tree) => {
                let matrix = to_matrix(x, &self.features)?;
                let predicted = tree
                    .predict(&matrix)
                    .map_err(|e| InferenceError::PredictionFailed(format!("{:?}", e)))?;
                Ok(predicted.into_iter().map(|class| class == 1).collect())
            }
        }
    }
}

/// Bagged decision trees, each fitted on a bootstrap sample and a random
/// `sqrt(n_features)` column subset. Class probabilities are vote fractions.
#[derive(Serialize, Deserialize)]
pub struct RandomForest {
    config: TreeModelConfig,
    seed: u64,
    members: Vec<ForestMember>,
}

impl RandomForest {
    pub fn new(config: TreeModelConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            members: Vec::new(),
        }
    }

    /// Number of fitted trees
    pub fn n_trees(&self) -> usize {
        self.members.len()
    }

    fn votes(&self, x: ArrayView2<f64>) -> Result<Vec<usize>, InferenceError> {
        if self.members.is_empty() {
            return Err(InferenceError::NotTrained);
        }
        let mut positive = vec![0usize; x.nrows()];
        if x.nrows() == 0 {
            return Ok(positive);
        }

        for member in &self.members {
            for (count, class) in positive.iter_mut().zip(member.predict(x)?) {
                *count += usize::from(class);
            }
        }
        Ok(positive)
    }
}

impl FromPipelineConfig for RandomForest {
    fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.tree_model.clone(), config.random_seed)
    }
}

impl TreeModel for RandomForest {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[bool]) -> Result<(), InferenceError> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(InferenceError::TrainingFailed(
                "tree model needs at least one sample and one feature".to_string(),
            ));
        }
        if y.len() != n_samples {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{} labels", n_samples),
                actual: format!("{} labels", y.len()),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let subspace = ((n_features as f64).sqrt().round() as usize).clamp(1, n_features);
        let mut parameters = DecisionTreeClassifierParameters::default();
        if let Some(depth) = self.config.max_depth {
            parameters = parameters.with_max_depth(depth);
        }

        let mut members = Vec::with_capacity(self.config.n_trees);
        let mut constant = 0;
        for _ in 0..self.config.n_trees {
            let mut features = sample(&mut rng, n_features, subspace).into_vec();
            features.sort_unstable();

            let rows: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
            let sample_x = x.select(ndarray::Axis(0), &rows);
            let sample_y: Vec<u32> = rows.iter().map(|&i| u32::from(y[i])).collect();

            // smartcore rejects single-class targets
            let vote = if sample_y.iter().all(|&c| c == sample_y[0]) {
                constant += 1;
                Vote::Constant(sample_y[0] == 1)
            } else {
                let matrix = to_matrix(sample_x.view(), &features)?;
                let tree = Tree::fit(&matrix, &sample_y, parameters.clone())
                    .map_err(|e| InferenceError::TrainingFailed(format!("{:?}", e)))?;
                Vote::Tree(tree)
            };
            members.push(ForestMember { features, vote });
        }

        self.members = members;
        if constant > 0 {
            debug!("{} bootstrap samples held a single class", constant);
        }
        info!(
            "Fitted random forest: {} trees, {} of {} features each",
            self.members.len(),
            subspace,
            n_features
        );
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<bool>, InferenceError> {
        let trees = self.members.len();
        Ok(self
            .votes(x)?
            .into_iter()
            .map(|positive| 2 * positive > trees)
            .collect())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, InferenceError> {
        let trees = self.members.len() as f64;
        let votes = self.votes(x)?;
        debug!("Forest voted on {} rows", votes.len());

        let mut proba = Array2::zeros((votes.len(), 2));
        for (i, positive) in votes.into_iter().enumerate() {
            let p = positive as f64 / trees;
            proba[[i, 0]] = 1.0 - p;
            proba[[i, 1]] = p;
        }
        Ok(proba)
    }
}

impl fmt::Debug for RandomForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomForest")
            .field("config", &self.config)
            .field("seed", &self.seed)
            .field("trees", &self.members.len())
            .finish()
    }
}

fn to_matrix(x: ArrayView2<f64>, columns: &[usize]) -> Result<DenseMatrix<f64>, InferenceError> {
    let rows: Vec<Vec<f64>> = x
        .outer_iter()
        .map(|row| columns.iter().map(|&c| row[c]).collect())
        .collect();
    DenseMatrix::from_2d_vec(&rows)
        .map_err(|e| InferenceError::InvalidInputShape {
            expected: format!("{} columns", columns.len()),
            actual: format!("{:?}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Two well separated clusters; label follows the first column's sign.
    fn clusters(n: usize) -> (Array2<f64>, Vec<bool>) {
        let x = Array2::from_shape_fn((n, 4), |(i, j)| {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            sign * (2.0 + (i + j) as f64 * 0.01)
        });
        let y = (0..n).map(|i| i % 2 == 0).collect();
        (x, y)
    }

    fn small_forest() -> RandomForest {
        RandomForest::new(
            TreeModelConfig {
                n_trees: 15,
                max_depth: Some(4),
            },
            7,
        )
    }

    #[test]
    fn test_predict_before_fit() {
        let forest = small_forest();
        let (x, _) = clusters(4);
        assert!(matches!(forest.predict(x.view()), Err(InferenceError::NotTrained)));
    }

    #[test]
    fn test_probabilities_are_distributions() {
        let (x, y) = clusters(40);
        let mut forest = small_forest();
        forest.fit(x.view(), &y).unwrap();
        assert_eq!(forest.n_trees(), 15);

        let proba = forest.predict_proba(x.view()).unwrap();
        assert_eq!(proba.dim(), (40, 2));
        for row in proba.outer_iter() {
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_separable_clusters() {
        let (x, y) = clusters(40);
        let mut forest = small_forest();
        forest.fit(x.view(), &y).unwrap();

        let predicted = forest.predict(x.view()).unwrap();
        let correct = predicted.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct >= 36, "only {correct} of 40 correct");
    }

    #[test]
    fn test_single_class_labels() {
        let (x, _) = clusters(30);
        let mut forest = small_forest();
        forest.fit(x.view(), &[false; 30]).unwrap();

        assert_eq!(forest.predict(x.view()).unwrap(), vec![false; 30]);
        let proba = forest.predict_proba(x.view()).unwrap();
        assert_eq!(proba.dim(), (30, 2));
        assert!(proba.column(0).iter().all(|&p| p == 1.0));
        assert!(proba.column(1).iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_rare_positive_label() {
        // One positive in forty; most bootstraps miss it entirely
        let (x, _) = clusters(40);
        let y: Vec<bool> = (0..40).map(|i| i == 7).collect();
        let mut forest = RandomForest::new(
            TreeModelConfig {
                n_trees: 100,
                max_depth: None,
            },
            3,
        );
        forest.fit(x.view(), &y).unwrap();
        assert_eq!(forest.n_trees(), 100);

        let proba = forest.predict_proba(x.view()).unwrap();
        assert_eq!(proba.dim(), (40, 2));
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_label_count_mismatch() {
        let (x, _) = clusters(6);
        let mut forest = small_forest();
        assert!(matches!(
            forest.fit(x.view(), &[true, false]),
            Err(InferenceError::InvalidInputShape { .. })
        ));
    }
}
