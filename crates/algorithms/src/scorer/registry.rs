//! Per-mode scorer registry resolved at configuration time

use super::{ModelScorer, ScorerError};
use geoshift_core::change::{AnalysisMode, ModelUse};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Turns a model file into a scorer.
pub trait ModelLoader {
    fn load(&self, mode: AnalysisMode, path: &Path) -> Result<Arc<dyn ModelScorer>, ScorerError>;
}

/// Loader for builds without a model runtime: every load is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRuntimeLoader;

impl ModelLoader for NoRuntimeLoader {
    fn load(&self, _mode: AnalysisMode, path: &Path) -> Result<Arc<dyn ModelScorer>, ScorerError> {
        Err(ScorerError::Unavailable(format!(
            "no model runtime available to load {}",
            path.display()
        )))
    }
}

/// A configured scorer, or the reason configuration failed.
#[derive(Clone)]
pub enum ScorerSlot {
    Ready(Arc<dyn ModelScorer>),
    Unavailable(ScorerError),
}

impl std::fmt::Debug for ScorerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScorerSlot::Ready(s) => f.debug_tuple("Ready").field(&s.name()).finish(),
            ScorerSlot::Unavailable(e) => f.debug_tuple("Unavailable").field(e).finish(),
        }
    }
}

/// Scorers by analysis mode.
#[derive(Debug, Clone, Default)]
pub struct ScorerSet {
    slots: BTreeMap<AnalysisMode, ScorerSlot>,
}

impl ScorerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready scorer for `mode`.
    pub fn with_scorer(mut self, mode: AnalysisMode, scorer: Arc<dyn ModelScorer>) -> Self {
        self.slots.insert(mode, ScorerSlot::Ready(scorer));
        self
    }

    /// Load the model configured for each mode.
    ///
    /// Modes that never use a model are skipped. Missing files and loader
    /// failures are kept as unavailable slots so the engine can report them.
    pub fn resolve(models: &BTreeMap<AnalysisMode, PathBuf>, loader: &dyn ModelLoader) -> Self {
        let mut slots = BTreeMap::new();
        for (&mode, path) in models {
            if mode.model_use() == ModelUse::Never {
                warn!("{} mode does not use a model; ignoring {}", mode, path.display());
                continue;
            }
            let slot = if !path.is_file() {
                ScorerSlot::Unavailable(ScorerError::Unavailable(format!(
                    "model file {} not found",
                    path.display()
                )))
            } else {
                match loader.load(mode, path) {
                    Ok(scorer) => {
                        info!("Loaded model {} for {} mode", scorer.name(), mode);
                        ScorerSlot::Ready(scorer)
                    }
                    Err(e) => ScorerSlot::Unavailable(e),
                }
            };
            slots.insert(mode, slot);
        }
        Self { slots }
    }

    pub fn get(&self, mode: AnalysisMode) -> Option<&ScorerSlot> {
        self.slots.get(&mode)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
