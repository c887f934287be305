//! # geoshift algorithms
//!
//! Change detection between two rasters of the same area.
//!
//! ## Stages
//!
//! - **reproject**: project both rasters onto one shared grid
//! - **imagery**: spectral vegetation and water proxies
//! - **texture**: Sobel edges and edge density
//! - **engine**: per-mode change scores, model routing, thresholding
//! - **scorer**: model scorer interface, registry and timeout runner
//! - **statistics**: changed area in pixels and hectares
//! - **pipeline**: open, align, analyze, summarize and render in one call

pub mod engine;
pub mod imagery;
pub mod pipeline;
pub mod reproject;
pub mod scorer;
pub mod statistics;
pub mod texture;

mod maybe_rayon;

use geoshift_core::{Error, Result};
use ndarray::Array2;

/// Build a `rows x cols` grid from row-major samples collected in parallel.
pub(crate) fn collect_grid(
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    stage: &'static str,
) -> Result<Array2<f32>> {
    let len = data.len();
    Array2::from_shape_vec((rows, cols), data).map_err(|_| Error::ShapeMismatch {
        stage,
        expected: (rows, cols),
        actual: (len / cols.max(1), cols),
    })
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{analyze, ChangeEngine, EngineConfig, WarningSink};
    pub use crate::imagery::{BandMapping, SpectralIndex};
    pub use crate::pipeline::{run, AnalysisConfig, AnalysisOutput, AnalysisRequest, ReportSummary};
    pub use crate::reproject::{align, AlignParams, AlignedPair, FootprintPolicy, ResamplingMethod};
    pub use crate::scorer::{ModelLoader, ModelScorer, ScoreOutput, ScorerError, ScorerSet};
    pub use crate::statistics::{summarize, summarize_result, AreaStats, AreaUnits, ChangeExtent};
    pub use geoshift_core::prelude::*;
}
