//! Sequence windowing over scaled frames

use crate::PreprocessError;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use tracing::debug;

/// One fixed-length window of scaled frames
#[derive(Debug, Clone)]
pub struct Window<'a> {
    /// Index of the window's first frame
    pub start: usize,
    /// `(sequence_length, n_features)` view
    pub frames: ArrayView2<'a, f64>,
    /// Label of the first frame after the window (training mode only)
    pub label: Option<bool>,
}

impl Window<'_> {
    /// Number of frames in the window
    pub fn len(&self) -> usize {
        self.frames.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazy, restartable window sequence.
///
/// Cloning yields an independent iterator positioned at the same index, so a
/// fresh clone of an unstarted sequence replays every window.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    scaled: ArrayView2<'a, f64>,
    labels: Option<&'a [bool]>,
    sequence_length: usize,
    next: usize,
    count: usize,
}

impl<'a> Windows<'a> {
    /// Total number of windows in the sequence
    pub fn total(&self) -> usize {
        self.count
    }

    /// Materialize the remaining windows into a dense batch
    pub fn collect_batch(self) -> WindowBatch {
        let sequence_length = self.sequence_length;
        let n_features = self.scaled.ncols();
        let labelled = self.labels.is_some();

        let mut x = Array3::zeros((self.len(), sequence_length, n_features));
        let mut y = Vec::with_capacity(if labelled { self.len() } else { 0 });
        for (i, window) in self.enumerate() {
            x.index_axis_mut(Axis(0), i).assign(&window.frames);
            if let Some(label) = window.label {
                y.push(label);
            }
        }

        WindowBatch {
            x,
            labels: labelled.then_some(y),
        }
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let start = self.next;
        self.next += 1;

        let end = start + self.sequence_length;
        Some(Window {
            start,
            frames: self.scaled.slice_move(s![start..end, ..]),
            label: self.labels.map(|labels| labels[end]),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows<'_> {}

/// Dense window tensor ready for the models
#[derive(Debug, Clone, PartialEq)]
pub struct WindowBatch {
    /// `(n_windows, sequence_length, n_features)`
    pub x: Array3<f64>,
    /// One label per window when built in training mode
    pub labels: Option<Vec<bool>>,
}

impl WindowBatch {
    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sequence_length(&self) -> usize {
        self.x.len_of(Axis(1))
    }

    pub fn num_features(&self) -> usize {
        self.x.len_of(Axis(2))
    }

    /// Flatten each window time-major into `(n_windows, sequence_length * n_features)`
    pub fn flatten(&self) -> Array2<f64> {
        let (n, steps, features) = self.x.dim();
        let mut flat = Array2::zeros((n, steps * features));
        for (i, window) in self.x.outer_iter().enumerate() {
            for (j, value) in window.iter().enumerate() {
                flat[[i, j]] = *value;
            }
        }
        flat
    }

    /// Sub-batch with the given window indices, in order
    pub fn select(&self, indices: &[usize]) -> WindowBatch {
        WindowBatch {
            x: self.x.select(Axis(0), indices),
            labels: self
                .labels
                .as_ref()
                .map(|labels| indices.iter().map(|&i| labels[i]).collect()),
        }
    }
}

/// Slices scaled frame matrices into fixed-length windows
#[derive(Debug, Clone, Copy)]
pub struct SequenceWindower {
    sequence_length: usize,
}

impl SequenceWindower {
    /// Create a windower; `sequence_length` must be positive
    pub fn new(sequence_length: usize) -> Self {
        assert!(sequence_length > 0, "Sequence length must be > 0");
        Self { sequence_length }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Labelled windows: `max(0, N - L)` of them.
    ///
    /// Each window takes the label of the frame immediately after it, at
    /// index `start + sequence_length`.
    pub fn training<'a>(
        &self,
        scaled: ArrayView2<'a, f64>,
        labels: &'a [bool],
    ) -> Result<Windows<'a>, PreprocessError> {
        if labels.len() != scaled.nrows() {
            return Err(PreprocessError::LabelMismatch {
                frames: scaled.nrows(),
                labels: labels.len(),
            });
        }
        let count = scaled.nrows().saturating_sub(self.sequence_length);
        debug!("Training windows: {} frames -> {} windows", scaled.nrows(), count);
        Ok(Windows {
            scaled,
            labels: Some(labels),
            sequence_length: self.sequence_length,
            next: 0,
            count,
        })
    }

    /// Unlabelled windows: `max(0, N - L + 1)` of them
    pub fn inference<'a>(&self, scaled: ArrayView2<'a, f64>) -> Windows<'a> {
        let count = (scaled.nrows() + 1).saturating_sub(self.sequence_length);
        debug!("Inference windows: {} frames -> {} windows", scaled.nrows(), count);
        Windows {
            scaled,
            labels: None,
            sequence_length: self.sequence_length,
            next: 0,
            count,
        }
    }
}
