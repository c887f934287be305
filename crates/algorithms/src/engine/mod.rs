//! Change engine: per-mode scoring, model routing and thresholding
//!
//! Each mode declares whether it never uses, prefers, or requires a model
//! scorer ([`ModelUse`]). The engine takes the model path when a scorer is
//! configured for the mode, and the deterministic heuristic otherwise.
//! Scorer problems are downgraded to warnings; only invalid input is fatal.

mod control;
mod heuristics;

pub use control::{CancelToken, CollectingSink, TracingSink, WarningSink};

use crate::imagery::{BandMapping, SpectralIndex};
use crate::reproject::AlignedPair;
use crate::scorer::{
    run_with_timeout, ModelScorer, ScorerError, ScorerSet, ScorerSlot, DEFAULT_SCORER_TIMEOUT,
};
use crate::texture::EdgeDensityParams;
use geoshift_core::change::{AnalysisMode, AnalysisWarning, ChangeResult, ModelUse, ScoreSource};
use geoshift_core::{Raster, Result};
use heuristics::Scene;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Heuristic threshold overrides by mode; other modes use their defaults
    pub thresholds: BTreeMap<AnalysisMode, f32>,
    /// Model score threshold overrides by mode, in model probability units
    pub model_thresholds: BTreeMap<AnalysisMode, f32>,
    /// Band layout; inferred from the band count when absent
    pub band_mapping: Option<BandMapping>,
    /// Time limit for one model scorer call, in milliseconds
    pub scorer_timeout_ms: u64,
    pub edge_density: EdgeDensityParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: BTreeMap::new(),
            model_thresholds: BTreeMap::new(),
            band_mapping: None,
            scorer_timeout_ms: DEFAULT_SCORER_TIMEOUT.as_millis() as u64,
            edge_density: EdgeDensityParams::default(),
        }
    }
}

impl EngineConfig {
    /// Threshold for `mode` given where its scores come from.
    ///
    /// Heuristic and model scores live on different scales, so each source
    /// has its own override table.
    pub fn threshold_for(&self, mode: AnalysisMode, source: &ScoreSource) -> f32 {
        match source {
            ScoreSource::Heuristic => self
                .thresholds
                .get(&mode)
                .copied()
                .unwrap_or_else(|| mode.default_threshold()),
            ScoreSource::Model { .. } => self
                .model_thresholds
                .get(&mode)
                .copied()
                .unwrap_or_else(|| mode.default_model_threshold()),
        }
    }

    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_millis(self.scorer_timeout_ms)
    }
}

/// Scores aligned pairs under an analysis mode.
pub struct ChangeEngine {
    config: EngineConfig,
    scorers: ScorerSet,
    sink: Arc<dyn WarningSink>,
}

impl std::fmt::Debug for ChangeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEngine")
            .field("config", &self.config)
            .field("scorers", &self.scorers)
            .finish_non_exhaustive()
    }
}

enum Route {
    Heuristic,
    Model(Arc<dyn ModelScorer>),
    /// Heuristic stand-in, with the reason a model was not used
    Degraded(String),
}

impl ChangeEngine {
    /// Heuristic-only engine reporting warnings through `tracing`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            scorers: ScorerSet::new(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_scorers(mut self, scorers: ScorerSet) -> Self {
        self.scorers = scorers;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn WarningSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Score `pair` under `mode` and threshold the scores.
    ///
    /// Model-backed modes hand the shared pair to their scorer on a worker
    /// thread bounded by the configured timeout.
    pub fn analyze(&self, pair: &Arc<AlignedPair>, mode: AnalysisMode) -> Result<ChangeResult> {
        self.run(pair, Some(pair), mode)
    }

    fn run(
        &self,
        pair: &AlignedPair,
        shared: Option<&Arc<AlignedPair>>,
        mode: AnalysisMode,
    ) -> Result<ChangeResult> {
        let scene = Scene::new(pair);
        let mut warnings = Vec::new();

        let modelled = match (self.route(mode), shared) {
            (Route::Model(scorer), Some(shared)) => {
                let name = scorer.name().to_string();
                let (rows, cols) = pair.shape();
                match run_with_timeout(scorer, Arc::clone(shared), self.config.scorer_timeout())
                    .and_then(|out| out.into_pixels(rows, cols))
                {
                    Ok(scores) => Some((scores, name)),
                    Err(e) => {
                        warnings.push(scorer_warning(mode, &e));
                        None
                    }
                }
            }
            (Route::Model(_), None) => {
                warnings.push(scorer_warning(
                    mode,
                    &ScorerError::Unavailable("model scoring needs a shared pair".into()),
                ));
                None
            }
            (Route::Degraded(reason), _) => {
                warnings.push(AnalysisWarning::ScorerUnavailable { mode, reason });
                None
            }
            (Route::Heuristic, _) => None,
        };

        let (scores, source) = match modelled {
            Some((mut scores, name)) => {
                Zip::from(&mut scores).and(&scene.valid).for_each(|s, &ok| {
                    if !ok {
                        *s = f32::NAN;
                    }
                });
                (scores, ScoreSource::Model { name })
            }
            None => (self.heuristic(&scene, mode, &mut warnings)?, ScoreSource::Heuristic),
        };

        for warning in &warnings {
            self.sink.warn(warning);
        }

        let threshold = self.config.threshold_for(mode, &source);
        let mut score = Raster::from_array(scores);
        score.set_transform(*pair.transform());
        score.set_crs(pair.crs().cloned());
        score.set_nodata(Some(f32::NAN));

        let result = ChangeResult::from_scores(
            mode,
            Arc::new(score),
            threshold,
            mode.policy(),
            source,
            warnings,
        )?;
        info!(
            "{} analysis: {} of {} pixels changed at threshold {:.4} ({:?})",
            mode,
            result.changed_count(),
            result.score().valid_count(),
            threshold,
            result.source()
        );
        Ok(result)
    }

    fn route(&self, mode: AnalysisMode) -> Route {
        let slot = self.scorers.get(mode);
        match (mode.model_use(), slot) {
            (ModelUse::Never, _) => Route::Heuristic,
            (_, Some(ScorerSlot::Ready(scorer))) => Route::Model(Arc::clone(scorer)),
            (_, Some(ScorerSlot::Unavailable(e))) => Route::Degraded(e.to_string()),
            (ModelUse::Requires, None) => Route::Degraded("no model configured".into()),
            (ModelUse::Prefers, None) => {
                debug!("{} mode: no model configured, using heuristic", mode);
                Route::Heuristic
            }
        }
    }

    fn heuristic(
        &self,
        scene: &Scene<'_>,
        mode: AnalysisMode,
        warnings: &mut Vec<AnalysisWarning>,
    ) -> Result<Array2<f32>> {
        let edges = self.config.edge_density;
        match mode {
            AnalysisMode::LandUse => heuristics::land_use(scene),
            AnalysisMode::Deforestation => {
                self.index_change(scene, mode, SpectralIndex::vegetation, warnings)
            }
            AnalysisMode::Water => self.index_change(scene, mode, SpectralIndex::water, warnings),
            AnalysisMode::Structures => heuristics::structures(scene, edges),
            AnalysisMode::Disaster => heuristics::disaster(scene, edges),
        }
    }

    fn index_change(
        &self,
        scene: &Scene<'_>,
        mode: AnalysisMode,
        select: fn(&BandMapping) -> SpectralIndex,
        warnings: &mut Vec<AnalysisWarning>,
    ) -> Result<Array2<f32>> {
        let mapping = self
            .config
            .band_mapping
            .or_else(|| BandMapping::for_band_count(scene.bands()));
        match mapping {
            Some(mapping) => {
                let index = select(&mapping);
                debug!("{} mode: using {}", mode, index.name());
                heuristics::index_change(scene, index, &mapping)
            }
            None => {
                warnings.push(AnalysisWarning::IndexFallback {
                    mode,
                    reason: format!("{} band(s) cannot form a spectral index", scene.bands()),
                });
                heuristics::signed_intensity(scene)
            }
        }
    }
}

fn scorer_warning(mode: AnalysisMode, error: &ScorerError) -> AnalysisWarning {
    AnalysisWarning::ScorerUnavailable {
        mode,
        reason: error.to_string(),
    }
}

/// Heuristic analysis of `pair` under `mode`.
///
/// Modes that require a model run their heuristic stand-in and carry a
/// `ScorerUnavailable` warning.
pub fn analyze(pair: &AlignedPair, mode: AnalysisMode, config: &EngineConfig) -> Result<ChangeResult> {
    ChangeEngine::new(config.clone()).run(pair, None, mode)
}
