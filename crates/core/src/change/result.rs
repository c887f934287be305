//! Change results: score array, class mask and severity grades

use crate::change::mode::{AnalysisMode, ThresholdPolicy};
use crate::error::{Error, Result};
use crate::raster::Raster;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Mask value of pixels without valid data in either image.
pub const MASK_NODATA: i8 = i8::MIN;
/// Severity value of pixels without valid data in either image.
pub const SEVERITY_NODATA: u8 = u8::MAX;

/// Signed class label of a mask pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum ChangeClass {
    /// Loss, retraction or decrease
    Decrease = -1,
    NoChange = 0,
    /// Change, gain or expansion
    Increase = 1,
}

impl ChangeClass {
    pub fn from_label(label: i8) -> Option<Self> {
        match label {
            -1 => Some(Self::Decrease),
            0 => Some(Self::NoChange),
            1 => Some(Self::Increase),
            _ => None,
        }
    }

    /// Mode-specific name of this class.
    pub fn describe(&self, mode: AnalysisMode) -> &'static str {
        match (mode, self) {
            (_, Self::NoChange) => "no change",
            (AnalysisMode::Water, Self::Increase) => "expansion",
            (AnalysisMode::Water, Self::Decrease) => "retraction",
            (AnalysisMode::Deforestation, Self::Decrease) => "forest loss",
            (AnalysisMode::Structures, Self::Increase) => "new structure",
            (AnalysisMode::Disaster, Self::Increase) => "damage",
            (_, Self::Increase) => "change",
            (_, Self::Decrease) => "decrease",
        }
    }
}

/// Grade of a flagged pixel by how far its score exceeds the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    None = 0,
    Low = 1,
    Moderate = 2,
    High = 3,
}

impl Severity {
    pub const GRADED: [Severity; 3] = [Severity::Low, Severity::Moderate, Severity::High];

    /// Grade from `|score| / threshold` of a pixel already known to be flagged.
    pub fn grade(magnitude: f32, threshold: f32) -> Self {
        let ratio = if threshold > 0.0 {
            magnitude / threshold
        } else {
            f32::INFINITY
        };
        if ratio >= 2.5 {
            Severity::High
        } else if ratio >= 1.5 {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Low),
            2 => Some(Self::Moderate),
            3 => Some(Self::High),
            _ => None,
        }
    }
}

/// Where a score array came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreSource {
    Heuristic,
    Model { name: String },
}

/// Non-fatal condition reported during an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisWarning {
    /// The model scorer could not be used; the heuristic ran instead
    ScorerUnavailable { mode: AnalysisMode, reason: String },
    /// The spectral index could not be formed from the available bands
    IndexFallback { mode: AnalysisMode, reason: String },
}

impl fmt::Display for AnalysisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScorerUnavailable { mode, reason } => write!(
                f,
                "model scorer unavailable for {} ({}); using heuristic",
                mode, reason
            ),
            Self::IndexFallback { mode, reason } => {
                write!(f, "{}: {}; using intensity difference", mode, reason)
            }
        }
    }
}

/// Outcome of one change analysis.
///
/// The score array is shared behind an `Arc`: re-thresholding builds a new
/// mask and severity grid over the very same scores.
#[derive(Debug, Clone)]
pub struct ChangeResult {
    mode: AnalysisMode,
    threshold: f32,
    policy: ThresholdPolicy,
    source: ScoreSource,
    score: Arc<Raster<f32>>,
    mask: Raster<i8>,
    severity: Raster<u8>,
    warnings: Vec<AnalysisWarning>,
}

impl ChangeResult {
    /// Threshold a score array. NaN scores become nodata in mask and severity.
    pub fn from_scores(
        mode: AnalysisMode,
        score: Arc<Raster<f32>>,
        threshold: f32,
        policy: ThresholdPolicy,
        source: ScoreSource,
        warnings: Vec<AnalysisWarning>,
    ) -> Result<Self> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::InvalidParameter {
                name: "threshold",
                value: threshold.to_string(),
                reason: "must be a finite, non-negative number".into(),
            });
        }
        let (mask, severity) = classify(&score, threshold, policy);
        Ok(Self {
            mode,
            threshold,
            policy,
            source,
            score,
            mask,
            severity,
            warnings,
        })
    }

    /// Same scores, new threshold. Never recomputes scores.
    pub fn rethreshold(&self, threshold: f32) -> Result<Self> {
        Self::from_scores(
            self.mode,
            Arc::clone(&self.score),
            threshold,
            self.policy,
            self.source.clone(),
            self.warnings.clone(),
        )
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn policy(&self) -> ThresholdPolicy {
        self.policy
    }

    pub fn source(&self) -> &ScoreSource {
        &self.source
    }

    pub fn score(&self) -> &Raster<f32> {
        &self.score
    }

    /// Shared handle to the score array.
    pub fn shared_score(&self) -> &Arc<Raster<f32>> {
        &self.score
    }

    /// Signed class labels, see [`ChangeClass`]; [`MASK_NODATA`] where invalid.
    pub fn mask(&self) -> &Raster<i8> {
        &self.mask
    }

    /// Severity codes, see [`Severity`]; [`SEVERITY_NODATA`] where invalid.
    pub fn severity(&self) -> &Raster<u8> {
        &self.severity
    }

    pub fn warnings(&self) -> &[AnalysisWarning] {
        &self.warnings
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mask.shape()
    }

    /// Pixels labelled with `class`.
    pub fn count(&self, class: ChangeClass) -> usize {
        let label = class as i8;
        self.mask.data().iter().filter(|&&v| v == label).count()
    }

    /// Pixels flagged as any kind of change.
    pub fn changed_count(&self) -> usize {
        self.mask
            .data()
            .iter()
            .filter(|&&v| v != 0 && v != MASK_NODATA)
            .count()
    }

    /// Boolean view of the mask: true for any change.
    pub fn changed(&self) -> Array2<bool> {
        self.mask.data().mapv(|v| v != 0 && v != MASK_NODATA)
    }
}

fn classify(score: &Raster<f32>, threshold: f32, policy: ThresholdPolicy) -> (Raster<i8>, Raster<u8>) {
    let shape = score.shape();
    let mut mask = Array2::<i8>::zeros(shape);
    let mut severity = Array2::<u8>::zeros(shape);

    Zip::from(&mut mask)
        .and(&mut severity)
        .and(score.data())
        .for_each(|m, sev, &s| {
            if s.is_nan() {
                *m = MASK_NODATA;
                *sev = SEVERITY_NODATA;
                return;
            }
            let class = match policy {
                ThresholdPolicy::Magnitude if s > threshold => ChangeClass::Increase,
                ThresholdPolicy::Signed if s > threshold => ChangeClass::Increase,
                ThresholdPolicy::Signed | ThresholdPolicy::DecreaseOnly if s < -threshold => {
                    ChangeClass::Decrease
                }
                _ => ChangeClass::NoChange,
            };
            *m = class as i8;
            *sev = match class {
                ChangeClass::NoChange => Severity::None,
                _ => Severity::grade(s.abs(), threshold),
            } as u8;
        });

    (
        score.with_data(mask, Some(MASK_NODATA)),
        score.with_data(severity, Some(SEVERITY_NODATA)),
    )
}
