//! End-to-end analysis: open, align, analyze, summarize, render
//!
//! Each stage runs to completion before the next starts. A [`CancelToken`]
//! is checked between stages, and every fatal error leaves this module
//! annotated with its stage and the requested mode.

use crate::engine::{CancelToken, ChangeEngine, EngineConfig, WarningSink};
use crate::imagery::BandMapping;
use crate::reproject::{align, AlignParams, AlignedPair, FootprintPolicy, ResamplingMethod};
use crate::scorer::{ModelLoader, ScorerSet, DEFAULT_SCORER_TIMEOUT};
use crate::statistics::{summarize_result, AreaStats, AreaUnits, ChangeExtent};
use geoshift_colormap::{render, OverlayImage};
use geoshift_core::change::{AnalysisMode, AnalysisWarning, ChangeResult, ScoreSource, ThresholdPolicy};
use geoshift_core::error::Bounds;
use geoshift_core::io::{open, ReadOptions};
use geoshift_core::{Error, GeoTransform, Result, Stage, CRS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Settings that apply to one analysis mode only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeOverrides {
    /// Replaces the mode's default heuristic threshold
    pub threshold: Option<f32>,
    /// Replaces the threshold applied to model scores (default 0.5)
    pub model_threshold: Option<f32>,
    /// Model file for modes that can use a model scorer
    pub model: Option<PathBuf>,
}

/// Configuration of one analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub mode: AnalysisMode,
    pub modes: BTreeMap<AnalysisMode, ModeOverrides>,
    /// CRS of the shared grid
    pub target_crs: CRS,
    /// Forces one resampling method for both rasters
    pub resampling: Option<ResamplingMethod>,
    pub footprint: FootprintPolicy,
    pub before_crs: Option<CRS>,
    pub after_crs: Option<CRS>,
    /// Time limit for one model scorer call, in milliseconds
    pub scorer_timeout_ms: u64,
    pub band_mapping: Option<BandMapping>,
    pub read: ReadOptions,
    pub area_units: AreaUnits,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::LandUse,
            modes: BTreeMap::new(),
            target_crs: CRS::wgs84(),
            resampling: None,
            footprint: FootprintPolicy::Intersection,
            before_crs: None,
            after_crs: None,
            scorer_timeout_ms: DEFAULT_SCORER_TIMEOUT.as_millis() as u64,
            band_mapping: None,
            read: ReadOptions::default(),
            area_units: AreaUnits::Pixels,
        }
    }
}

impl AnalysisConfig {
    pub fn for_mode(mode: AnalysisMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Overrides for `mode`, created empty on first access.
    pub fn overrides_mut(&mut self, mode: AnalysisMode) -> &mut ModeOverrides {
        self.modes.entry(mode).or_default()
    }

    pub fn align_params(&self) -> AlignParams {
        AlignParams {
            target_crs: self.target_crs.clone(),
            footprint: self.footprint,
            resampling: self.resampling,
            before_crs: self.before_crs.clone(),
            after_crs: self.after_crs.clone(),
            memory_budget_bytes: self.read.memory_budget_bytes,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            thresholds: self
                .modes
                .iter()
                .filter_map(|(&mode, o)| o.threshold.map(|t| (mode, t)))
                .collect(),
            model_thresholds: self
                .modes
                .iter()
                .filter_map(|(&mode, o)| o.model_threshold.map(|t| (mode, t)))
                .collect(),
            band_mapping: self.band_mapping,
            scorer_timeout_ms: self.scorer_timeout_ms,
            ..EngineConfig::default()
        }
    }

    pub fn model_paths(&self) -> BTreeMap<AnalysisMode, PathBuf> {
        self.modes
            .iter()
            .filter_map(|(&mode, o)| o.model.clone().map(|p| (mode, p)))
            .collect()
    }
}

/// The two rasters to compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub before: PathBuf,
    pub after: PathBuf,
}

impl AnalysisRequest {
    pub fn new(before: impl Into<PathBuf>, after: impl Into<PathBuf>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }
}

/// Shared grid of the aligned pair, for placing the overlay on a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub transform: GeoTransform,
    /// `None` for plain images
    pub crs: Option<String>,
    pub bounds: Bounds,
}

/// Everything a report exporter needs, without pixel buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub mode: AnalysisMode,
    pub mode_label: String,
    pub threshold: f32,
    pub policy: ThresholdPolicy,
    pub source: ScoreSource,
    pub warnings: Vec<AnalysisWarning>,
    pub extent: ChangeExtent,
    pub stats: AreaStats,
    pub grid: GridSummary,
    pub inputs: AnalysisRequest,
}

impl ReportSummary {
    pub fn new(
        request: &AnalysisRequest,
        pair: &AlignedPair,
        result: &ChangeResult,
        stats: &AreaStats,
    ) -> Self {
        let (rows, cols) = pair.shape();
        Self {
            mode: result.mode(),
            mode_label: result.mode().label().to_string(),
            threshold: result.threshold(),
            policy: result.policy(),
            source: result.source().clone(),
            warnings: result.warnings().to_vec(),
            extent: stats.extent(),
            stats: stats.clone(),
            grid: GridSummary {
                rows,
                cols,
                bands: pair.bands(),
                transform: *pair.transform(),
                crs: pair.crs().map(CRS::identifier),
                bounds: pair.bounds(),
            },
            inputs: request.clone(),
        }
    }
}

/// Products of one analysis.
#[derive(Debug)]
pub struct AnalysisOutput {
    pub pair: Arc<AlignedPair>,
    pub result: ChangeResult,
    pub stats: AreaStats,
    pub overlay: OverlayImage,
    pub summary: ReportSummary,
}

/// Run one analysis request.
pub fn run(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
    loader: &dyn ModelLoader,
    sink: Arc<dyn WarningSink>,
    cancel: &CancelToken,
) -> Result<AnalysisOutput> {
    run_with_progress(request, config, loader, sink, cancel, &mut |_| {})
}

/// [`run`], calling `on_stage` as each stage starts.
pub fn run_with_progress(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
    loader: &dyn ModelLoader,
    sink: Arc<dyn WarningSink>,
    cancel: &CancelToken,
    on_stage: &mut dyn FnMut(Stage),
) -> Result<AnalysisOutput> {
    let mode = config.mode;
    let at = move |stage: Stage| move |e: Error| e.at_stage(stage, Some(mode.name()));
    let mut enter = |stage: Stage| -> Result<()> {
        cancel.check(stage)?;
        on_stage(stage);
        Ok(())
    };

    enter(Stage::Open)?;
    let before = open(&request.before, config.read.clone()).map_err(at(Stage::Open))?;
    let after = open(&request.after, config.read.clone()).map_err(at(Stage::Open))?;

    enter(Stage::Align)?;
    let pair = Arc::new(align(&before, &after, &config.align_params()).map_err(at(Stage::Align))?);
    drop((before, after));

    enter(Stage::Analyze)?;
    let scorers = ScorerSet::resolve(&config.model_paths(), loader);
    let engine = ChangeEngine::new(config.engine_config())
        .with_scorers(scorers)
        .with_sink(sink);
    let result = engine.analyze(&pair, mode).map_err(at(Stage::Analyze))?;

    enter(Stage::Summarize)?;
    let stats = summarize_result(&result, config.area_units).map_err(at(Stage::Summarize))?;

    enter(Stage::Render)?;
    let overlay = render(&result).map_err(at(Stage::Render))?;

    let summary = ReportSummary::new(request, &pair, &result, &stats);
    info!(
        "{} analysis of {} vs {}: {:.2}% changed ({:?})",
        mode,
        request.before.display(),
        request.after.display(),
        stats.percent_changed,
        summary.extent
    );

    Ok(AnalysisOutput {
        pair,
        result,
        stats,
        overlay,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_feed_engine_and_registry() {
        let mut config = AnalysisConfig::for_mode(AnalysisMode::Disaster);
        config.overrides_mut(AnalysisMode::Disaster).threshold = Some(0.3);
        config.overrides_mut(AnalysisMode::Structures).model = Some("roofs.onnx".into());
        config.overrides_mut(AnalysisMode::Structures).model_threshold = Some(0.7);

        let engine = config.engine_config();
        assert_eq!(engine.thresholds.get(&AnalysisMode::Disaster), Some(&0.3));
        assert!(!engine.thresholds.contains_key(&AnalysisMode::Structures));
        assert_eq!(engine.model_thresholds.get(&AnalysisMode::Structures), Some(&0.7));
        assert!(!engine.model_thresholds.contains_key(&AnalysisMode::Disaster));

        let models = config.model_paths();
        assert_eq!(models.len(), 1);
        assert_eq!(models[&AnalysisMode::Structures], PathBuf::from("roofs.onnx"));
    }

    #[test]
    fn align_params_carry_overrides() {
        let config = AnalysisConfig {
            footprint: FootprintPolicy::Union,
            resampling: Some(ResamplingMethod::Nearest),
            before_crs: Some(CRS::from_epsg(32633)),
            read: ReadOptions {
                memory_budget_bytes: 1 << 20,
                ..ReadOptions::default()
            },
            ..AnalysisConfig::default()
        };
        let params = config.align_params();
        assert_eq!(params.memory_budget_bytes, 1 << 20);
        assert_eq!(params.footprint, FootprintPolicy::Union);
        assert_eq!(params.resampling, Some(ResamplingMethod::Nearest));
        assert_eq!(params.before_crs, Some(CRS::from_epsg(32633)));
        assert_eq!(params.after_crs, None);
    }

    #[test]
    fn cancelled_before_open() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run(
            &AnalysisRequest::new("a.tif", "b.tif"),
            &AnalysisConfig::default(),
            &crate::scorer::NoRuntimeLoader,
            Arc::new(crate::engine::TracingSink),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled { stage: Stage::Open }));
    }

    #[test]
    fn open_errors_name_stage_and_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = run(
            &AnalysisRequest::new(dir.path().join("a.tif"), dir.path().join("b.tif")),
            &AnalysisConfig::for_mode(AnalysisMode::Water),
            &crate::scorer::NoRuntimeLoader,
            Arc::new(crate::engine::TracingSink),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Open));
        assert!(matches!(err.root(), Error::Io { .. }));
        assert!(err.to_string().contains("mode water"), "{err}");
    }
}
