//! Binary classification metrics

use serde::{Deserialize, Serialize};
use smartcore::metrics;
use std::fmt;

/// 2x2 confusion matrix laid out `[[tn, fp], [fn, tp]]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix(pub [[usize; 2]; 2]);

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[bool], predicted: &[bool]) -> Self {
        let mut cells = [[0usize; 2]; 2];
        for (&t, &p) in truth.iter().zip(predicted) {
            cells[usize::from(t)][usize::from(p)] += 1;
        }
        Self(cells)
    }

    pub fn true_negatives(&self) -> usize {
        self.0[0][0]
    }

    pub fn false_positives(&self) -> usize {
        self.0[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.0[1][0]
    }

    pub fn true_positives(&self) -> usize {
        self.0[1][1]
    }

    pub fn total(&self) -> usize {
        self.0.iter().flatten().sum()
    }
}

/// Precision, recall and F1 for one class (or an average)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class and averaged scores over a binary test set.
///
/// Ratios with a zero denominator are reported as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Class 0 (no maintenance)
    pub negative: ClassMetrics,
    /// Class 1 (maintenance)
    pub positive: ClassMetrics,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

/// Scores for the class encoded as `1.0` in `truth` and `predicted`.
///
/// With a single class in `truth` smartcore macro-averages over that one
/// class, which is still its own score. A class without support scores 0.
fn class_metrics(truth: Vec<f64>, predicted: Vec<f64>) -> ClassMetrics {
    let support = truth.iter().filter(|&&t| t == 1.0).count();
    if support == 0 {
        return ClassMetrics::default();
    }
    let precision = metrics::precision(&truth, &predicted);
    let recall = metrics::recall(&truth, &predicted);
    let f1 = if precision + recall > 0.0 {
        metrics::f1(&truth, &predicted, 1.0)
    } else {
        0.0
    };
    ClassMetrics {
        precision,
        recall,
        f1,
        support,
    }
}

/// One-vs-rest encoding of paired labels for `class`
fn encode(pairs: &[(bool, bool)], class: bool) -> (Vec<f64>, Vec<f64>) {
    let one_hot = |l: bool| if l == class { 1.0 } else { 0.0 };
    pairs.iter().map(|&(t, p)| (one_hot(t), one_hot(p))).unzip()
}

impl ClassificationReport {
    /// Score `predicted` against `truth`, pairwise up to the shorter slice
    pub fn from_predictions(truth: &[bool], predicted: &[bool]) -> Self {
        let pairs: Vec<(bool, bool)> = truth
            .iter()
            .copied()
            .zip(predicted.iter().copied())
            .collect();
        let (t, p) = encode(&pairs, false);
        let negative = class_metrics(t, p);
        let (t, p) = encode(&pairs, true);
        let positive = class_metrics(t, p);
        let total = pairs.len();
        let accuracy = if total == 0 {
            0.0
        } else {
            let (t, p): (Vec<u32>, Vec<u32>) =
                pairs.iter().map(|&(t, p)| (u32::from(t), u32::from(p))).unzip();
            metrics::accuracy(&t, &p)
        };

        let macro_avg = ClassMetrics {
            precision: (negative.precision + positive.precision) / 2.0,
            recall: (negative.recall + positive.recall) / 2.0,
            f1: (negative.f1 + positive.f1) / 2.0,
            support: total,
        };
        let weight = |n: f64, p: f64| {
            if total == 0 {
                0.0
            } else {
                (n * negative.support as f64 + p * positive.support as f64) / total as f64
            }
        };
        let weighted_avg = ClassMetrics {
            precision: weight(negative.precision, positive.precision),
            recall: weight(negative.recall, positive.recall),
            f1: weight(negative.f1, positive.f1),
            support: total,
        };

        Self {
            negative,
            positive,
            accuracy,
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        let row = |f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            )
        };
        row(f, "0", &self.negative)?;
        row(f, "1", &self.positive)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

/// Report plus confusion matrix for one supervised model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub report: ClassificationReport,
    pub confusion_matrix: ConfusionMatrix,
}

impl ModelEvaluation {
    pub fn new(truth: &[bool], predicted: &[bool]) -> Self {
        Self {
            report: ClassificationReport::from_predictions(truth, predicted),
            confusion_matrix: ConfusionMatrix::from_predictions(truth, predicted),
        }
    }
}
