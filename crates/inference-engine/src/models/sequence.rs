//! Temporal window classifier
//!
//! Each window is summarized per feature (last step, mean, standard deviation,
//! slope) and fed through one ReLU hidden layer into a sigmoid output. Trained
//! with mini-batch Adam on binary cross-entropy.

use super::{FromPipelineConfig, SequenceModel, TrainingHistory};
use crate::InferenceError;
use feature_engine::StatisticalFeatures;
use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis, Dimension};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use telemetry::{PipelineConfig, SequenceModelConfig};
use tracing::{debug, info};

/// Summary statistics per feature fed to the hidden layer
const SUMMARIES_PER_FEATURE: usize = 4;

const PROB_EPSILON: f64 = 1e-7;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseLayers {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    /// Output bias, kept as a one-element array so the optimizer treats it
    /// like every other parameter
    b2: Array1<f64>,
}

struct Forward {
    pre_activation: Array2<f64>,
    hidden: Array2<f64>,
    probabilities: Array1<f64>,
}

impl DenseLayers {
    fn init(inputs: usize, hidden: usize, rng: &mut ChaCha8Rng) -> Self {
        let limit1 = (6.0 / (inputs + hidden) as f64).sqrt();
        let limit2 = (6.0 / (hidden + 1) as f64).sqrt();
        Self {
            w1: Array2::from_shape_fn((inputs, hidden), |_| rng.gen_range(-limit1..limit1)),
            b1: Array1::zeros(hidden),
            w2: Array1::from_shape_fn(hidden, |_| rng.gen_range(-limit2..limit2)),
            b2: Array1::zeros(1),
        }
    }

    fn forward(&self, z: ArrayView2<f64>) -> Forward {
        let pre_activation = z.dot(&self.w1) + &self.b1;
        let hidden = pre_activation.mapv(|v| v.max(0.0));
        let probabilities = (hidden.dot(&self.w2) + self.b2[0]).mapv(sigmoid);
        Forward {
            pre_activation,
            hidden,
            probabilities,
        }
    }

    /// Gradients of the mean binary cross-entropy over the batch
    fn gradients(&self, z: ArrayView2<f64>, y: ArrayView1<f64>, pass: &Forward) -> DenseLayers {
        let m = z.nrows() as f64;
        let d_logit = (&pass.probabilities - &y) / m;

        let w2 = pass.hidden.t().dot(&d_logit);
        let b2 = Array1::from_elem(1, d_logit.sum());

        let mut d_hidden = &d_logit.view().insert_axis(Axis(1)) * &self.w2;
        d_hidden.zip_mut_with(&pass.pre_activation, |g, &pre| {
            if pre <= 0.0 {
                *g = 0.0;
            }
        });
        let w1 = z.t().dot(&d_hidden);
        let b1 = d_hidden.sum_axis(Axis(0));

        DenseLayers { w1, b1, w2, b2 }
    }
}

/// First and second moment estimates for one parameter tensor
#[derive(Debug, Clone)]
struct Moments<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn like(param: &Array<f64, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }
}

struct Adam {
    learning_rate: f64,
    step: i32,
    w1: Moments<ndarray::Ix2>,
    b1: Moments<ndarray::Ix1>,
    w2: Moments<ndarray::Ix1>,
    b2: Moments<ndarray::Ix1>,
}

impl Adam {
    fn new(layers: &DenseLayers, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            step: 0,
            w1: Moments::like(&layers.w1),
            b1: Moments::like(&layers.b1),
            w2: Moments::like(&layers.w2),
            b2: Moments::like(&layers.b2),
        }
    }

    fn apply(&mut self, layers: &mut DenseLayers, grads: &DenseLayers) {
        self.step += 1;
        let (lr, t) = (self.learning_rate, self.step);
        adam_step(&mut layers.w1, &grads.w1, &mut self.w1, lr, t);
        adam_step(&mut layers.b1, &grads.b1, &mut self.b1, lr, t);
        adam_step(&mut layers.w2, &grads.w2, &mut self.w2, lr, t);
        adam_step(&mut layers.b2, &grads.b2, &mut self.b2, lr, t);
    }
}

fn adam_step<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    moments: &mut Moments<D>,
    learning_rate: f64,
    step: i32,
) {
    let bias1 = 1.0 - ADAM_BETA1.powi(step);
    let bias2 = 1.0 - ADAM_BETA2.powi(step);

    moments.m.zip_mut_with(grad, |m, &g| *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g);
    moments.v.zip_mut_with(grad, |v, &g| *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g);

    ndarray::Zip::from(param)
        .and(&moments.m)
        .and(&moments.v)
        .for_each(|p, &m, &v| {
            *p -= learning_rate * (m / bias1) / ((v / bias2).sqrt() + ADAM_EPSILON);
        });
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn binary_cross_entropy(p: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let total: f64 = p
        .iter()
        .zip(y.iter())
        .map(|(&p, &y)| {
            let p = p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / p.len().max(1) as f64
}

fn accuracy(p: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let correct = p
        .iter()
        .zip(y.iter())
        .filter(|(&p, &y)| (p > 0.5) == (y > 0.5))
        .count();
    correct as f64 / p.len().max(1) as f64
}

/// `(n, L, F)` windows to `(n, 4F)` per-feature summaries
fn summarize(x: ArrayView3<f64>) -> Array2<f64> {
    let (n, steps, features) = x.dim();
    let mut z = Array2::zeros((n, features * SUMMARIES_PER_FEATURE));
    if steps == 0 {
        return z;
    }
    for (i, window) in x.outer_iter().enumerate() {
        for (j, column) in window.axis_iter(Axis(1)).enumerate() {
            let stats = StatisticalFeatures::compute(column.iter().copied());
            let base = j * SUMMARIES_PER_FEATURE;
            z[[i, base]] = column[steps - 1];
            z[[i, base + 1]] = stats.mean;
            z[[i, base + 2]] = stats.std_dev;
            z[[i, base + 3]] = stats.slope;
        }
    }
    z
}

/// Dense classifier over per-feature window summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalClassifier {
    config: SequenceModelConfig,
    seed: u64,
    layers: Option<DenseLayers>,
    n_features: usize,
}

impl TemporalClassifier {
    pub fn new(config: SequenceModelConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            layers: None,
            n_features: 0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.layers.is_some()
    }

    fn check_features(&self, x: &ArrayView3<f64>) -> Result<(), InferenceError> {
        let actual = x.len_of(Axis(2));
        if actual != self.n_features {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{} features per step", self.n_features),
                actual: format!("{} features per step", actual),
            });
        }
        Ok(())
    }
}

impl FromPipelineConfig for TemporalClassifier {
    fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.sequence_model.clone(), config.random_seed)
    }
}

impl SequenceModel for TemporalClassifier {
    fn fit(&mut self, x: ArrayView3<f64>, y: &[bool]) -> Result<TrainingHistory, InferenceError> {
        let n = x.len_of(Axis(0));
        if n == 0 {
            return Err(InferenceError::TrainingFailed(
                "sequence model needs at least one window".to_string(),
            ));
        }
        if y.len() != n {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{} labels", n),
                actual: format!("{} labels", y.len()),
            });
        }

        let z = summarize(x);
        let targets: Array1<f64> = y.iter().map(|&label| f64::from(u8::from(label))).collect();

        // Validation samples come from the tail, before any shuffling
        let n_val = if self.config.validation_split > 0.0 && n > 1 {
            ((self.config.validation_split * n as f64).ceil() as usize).min(n - 1)
        } else {
            0
        };
        let n_train = n - n_val;
        let z_val = z.slice(ndarray::s![n_train.., ..]);
        let y_val = targets.slice(ndarray::s![n_train..]);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut layers = DenseLayers::init(z.ncols(), self.config.hidden_units.max(1), &mut rng);
        let mut optimizer = Adam::new(&layers, self.config.learning_rate);
        let mut history = TrainingHistory::default();
        let mut order: Vec<usize> = (0..n_train).collect();

        for epoch in 0..self.config.epochs {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            let mut correct_sum = 0.0;

            for batch in order.chunks(self.config.batch_size.max(1)) {
                let zb = z.select(Axis(0), batch);
                let yb = targets.select(Axis(0), batch);
                let pass = layers.forward(zb.view());

                let weight = batch.len() as f64;
                loss_sum += binary_cross_entropy(pass.probabilities.view(), yb.view()) * weight;
                correct_sum += accuracy(pass.probabilities.view(), yb.view()) * weight;

                let grads = layers.gradients(zb.view(), yb.view(), &pass);
                optimizer.apply(&mut layers, &grads);
            }

            history.loss.push(loss_sum / n_train as f64);
            history.accuracy.push(correct_sum / n_train as f64);
            if n_val > 0 {
                let p = layers.forward(z_val).probabilities;
                history.val_loss.push(binary_cross_entropy(p.view(), y_val));
                history.val_accuracy.push(accuracy(p.view(), y_val));
            }
            debug!(
                "Epoch {}/{}: loss {:.4}, accuracy {:.3}",
                epoch + 1,
                self.config.epochs,
                history.loss[epoch],
                history.accuracy[epoch]
            );
        }

        self.layers = Some(layers);
        self.n_features = x.len_of(Axis(2));
        info!(
            "Fitted temporal classifier: {} training / {} validation windows, {} epochs",
            n_train,
            n_val,
            history.epochs()
        );
        Ok(history)
    }

    fn predict(&self, x: ArrayView3<f64>) -> Result<Array1<f64>, InferenceError> {
        let layers = self.layers.as_ref().ok_or(InferenceError::NotTrained)?;
        self.check_features(&x)?;
        Ok(layers.forward(summarize(x).view()).probabilities)
    }
}
