//! Analysis modes and their threshold and model policies

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a score array is turned into a class mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdPolicy {
    /// `score > t` is change (+1); scores are non-negative magnitudes
    Magnitude,
    /// `score < -t` is a loss (-1); increases are never flagged
    DecreaseOnly,
    /// `score > t` is a gain (+1), `score < -t` a loss (-1)
    Signed,
}

/// Whether a mode can use a trained model scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelUse {
    /// Always scored by the heuristic
    Never,
    /// Uses a model when one is configured; the heuristic is a full equal
    Prefers,
    /// The heuristic is a degraded stand-in; running without a model warns
    Requires,
}

/// Change analysis mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Absolute multi-band intensity difference
    LandUse,
    /// Vegetation index loss
    Deforestation,
    /// Water index gain (expansion) or loss (retraction)
    Water,
    /// Edge density gain combined with intensity difference
    Structures,
    /// Strongest band difference combined with texture disruption
    Disaster,
}

impl AnalysisMode {
    /// All modes, in menu order.
    pub const ALL: &'static [AnalysisMode] = &[
        Self::LandUse,
        Self::Deforestation,
        Self::Water,
        Self::Structures,
        Self::Disaster,
    ];

    /// Stable identifier used in configuration and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LandUse => "landuse",
            Self::Deforestation => "deforestation",
            Self::Water => "water",
            Self::Structures => "structures",
            Self::Disaster => "disaster",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LandUse => "Land-use Change",
            Self::Deforestation => "Deforestation",
            Self::Water => "Water Change",
            Self::Structures => "New Structures",
            Self::Disaster => "Disaster Damage",
        }
    }

    /// Threshold applied to heuristic scores when the caller gives none.
    ///
    /// Intensity-based scores are fractions of the sample type's full scale
    /// (30 and 50 counts of an 8-bit image for land-use and disaster);
    /// index-based scores are index units.
    pub fn default_threshold(&self) -> f32 {
        match self {
            Self::LandUse => 30.0 / 255.0,
            Self::Deforestation => 0.2,
            Self::Water => 0.2,
            Self::Structures => 0.15,
            Self::Disaster => 50.0 / 255.0,
        }
    }

    /// Threshold applied to model scores (probabilities) when the caller gives none.
    pub fn default_model_threshold(&self) -> f32 {
        0.5
    }

    pub fn policy(&self) -> ThresholdPolicy {
        match self {
            Self::LandUse | Self::Structures | Self::Disaster => ThresholdPolicy::Magnitude,
            Self::Deforestation => ThresholdPolicy::DecreaseOnly,
            Self::Water => ThresholdPolicy::Signed,
        }
    }

    pub fn model_use(&self) -> ModelUse {
        match self {
            Self::LandUse | Self::Deforestation | Self::Water => ModelUse::Never,
            Self::Structures => ModelUse::Prefers,
            Self::Disaster => ModelUse::Requires,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnalysisMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "landuse" | "land-use" | "land_use" => Ok(Self::LandUse),
            "deforestation" | "forest" => Ok(Self::Deforestation),
            "water" => Ok(Self::Water),
            "structures" | "new-structures" | "buildings" => Ok(Self::Structures),
            "disaster" | "damage" | "disaster-damage" => Ok(Self::Disaster),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names_and_aliases() {
        for mode in AnalysisMode::ALL {
            assert_eq!(mode.name().parse::<AnalysisMode>().unwrap(), *mode);
        }
        assert_eq!("Land-Use".parse::<AnalysisMode>().unwrap(), AnalysisMode::LandUse);
        assert!(matches!(
            "glaciers".parse::<AnalysisMode>(),
            Err(Error::InvalidMode(m)) if m == "glaciers"
        ));
    }

    #[test]
    fn disaster_threshold_is_higher_than_landuse() {
        assert!(AnalysisMode::Disaster.default_threshold() > AnalysisMode::LandUse.default_threshold());
        assert_eq!(AnalysisMode::Disaster.model_use(), ModelUse::Requires);
    }
}
