//! Model scorer interface
//!
//! A [`ModelScorer`] turns an aligned pair into a change probability per
//! pixel or per patch. Concrete scorers wrap a trained model; this crate only
//! defines the seam, the per-mode registry resolved at configuration time,
//! and a timeout-bounded runner.

mod registry;
mod runner;

pub use registry::{ModelLoader, NoRuntimeLoader, ScorerSet, ScorerSlot};
pub use runner::{run_with_timeout, DEFAULT_SCORER_TIMEOUT};

use crate::reproject::AlignedPair;
use ndarray::Array2;
use std::time::Duration;
use thiserror::Error;

/// Scores produced by a model.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutput {
    /// One score per pixel, same shape as the aligned grid
    PerPixel(Array2<f32>),
    /// One score per `patch_size` x `patch_size` block, row-major from the
    /// top-left; edge patches may be partial
    PerPatch { patch_size: usize, scores: Array2<f32> },
}

impl ScoreOutput {
    /// Expand to one score per pixel of a `rows` x `cols` grid.
    pub fn into_pixels(self, rows: usize, cols: usize) -> Result<Array2<f32>, ScorerError> {
        match self {
            ScoreOutput::PerPixel(scores) => {
                if scores.dim() != (rows, cols) {
                    return Err(ScorerError::BadOutput(format!(
                        "expected {}x{} scores, got {}x{}",
                        rows,
                        cols,
                        scores.nrows(),
                        scores.ncols()
                    )));
                }
                Ok(scores)
            }
            ScoreOutput::PerPatch { patch_size, scores } => {
                if patch_size == 0 {
                    return Err(ScorerError::BadOutput("patch size is zero".into()));
                }
                let expected = (rows.div_ceil(patch_size), cols.div_ceil(patch_size));
                if scores.dim() != expected {
                    return Err(ScorerError::BadOutput(format!(
                        "expected {}x{} patches of {} px, got {}x{}",
                        expected.0,
                        expected.1,
                        patch_size,
                        scores.nrows(),
                        scores.ncols()
                    )));
                }
                Ok(Array2::from_shape_fn((rows, cols), |(r, c)| {
                    scores[[r / patch_size, c / patch_size]]
                }))
            }
        }
    }
}

/// Why a scorer could not produce scores. Never fatal to an analysis.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),

    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),

    #[error("scorer failed: {0}")]
    Failed(String),

    #[error("scorer returned unusable output: {0}")]
    BadOutput(String),
}

/// A trained change model.
///
/// Implementations need not be deterministic. They run on a worker thread
/// and may be abandoned when they exceed the caller's timeout.
pub trait ModelScorer: Send + Sync {
    /// Short identifier reported alongside results.
    fn name(&self) -> &str;

    fn score(&self, pair: &AlignedPair) -> Result<ScoreOutput, ScorerError>;
}

/// Scorer backed by a closure; useful for embedding simple models.
pub struct FnScorer<F> {
    name: String,
    f: F,
}

impl<F> FnScorer<F>
where
    F: Fn(&AlignedPair) -> Result<ScoreOutput, ScorerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> ModelScorer for FnScorer<F>
where
    F: Fn(&AlignedPair) -> Result<ScoreOutput, ScorerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, pair: &AlignedPair) -> Result<ScoreOutput, ScorerError> {
        (self.f)(pair)
    }
}
