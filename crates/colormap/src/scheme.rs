//! Class palettes and continuous color ramps.

use geoshift_core::change::{AnalysisMode, ChangeClass, Severity, ThresholdPolicy};
use serde::{Deserialize, Serialize};

/// RGB color as (r, g, b) with values in 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn with_alpha(self, a: u8) -> [u8; 4] {
        [self.r, self.g, self.b, a]
    }
}

/// A color stop: position in [0, 1] mapped to an RGB color.
#[derive(Debug, Clone, Copy)]
pub struct ColorStop {
    pub t: f64,
    pub color: Rgb,
}

impl ColorStop {
    pub const fn new(t: f64, r: u8, g: u8, b: u8) -> Self {
        Self {
            t,
            color: Rgb::new(r, g, b),
        }
    }
}

/// Continuous ramps for score heatmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    /// Pale yellow -> orange -> dark brown (change magnitude)
    Heat,
    /// Blue -> White -> Red (signed change)
    BlueWhiteRed,
    /// Black -> White
    Grayscale,
}

impl ColorScheme {
    pub const ALL: &'static [ColorScheme] = &[Self::Heat, Self::BlueWhiteRed, Self::Grayscale];

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Heat => "Heat",
            Self::BlueWhiteRed => "Blue-White-Red",
            Self::Grayscale => "Grayscale",
        }
    }

    /// Ramp suited to scores thresholded under `policy`.
    pub fn for_policy(policy: ThresholdPolicy) -> Self {
        match policy {
            ThresholdPolicy::Magnitude => Self::Heat,
            ThresholdPolicy::DecreaseOnly | ThresholdPolicy::Signed => Self::BlueWhiteRed,
        }
    }
}

const HEAT_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 255, 255, 212),
    ColorStop::new(0.25, 254, 217, 142),
    ColorStop::new(0.50, 254, 153, 41),
    ColorStop::new(0.75, 204, 76, 2),
    ColorStop::new(1.00, 102, 37, 6),
];

const BLUE_WHITE_RED_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 33, 102, 172),
    ColorStop::new(0.25, 103, 169, 207),
    ColorStop::new(0.50, 247, 247, 247),
    ColorStop::new(0.75, 239, 138, 98),
    ColorStop::new(1.00, 178, 24, 43),
];

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn lerp_color(c1: Rgb, c2: Rgb, t: f64) -> Rgb {
    Rgb::new(
        lerp(c1.r as f64, c2.r as f64, t).round() as u8,
        lerp(c1.g as f64, c2.g as f64, t).round() as u8,
        lerp(c1.b as f64, c2.b as f64, t).round() as u8,
    )
}

fn multi_stop(stops: &[ColorStop], t: f64) -> Rgb {
    if t <= 0.0 {
        return stops[0].color;
    }
    if t >= 1.0 {
        return stops[stops.len() - 1].color;
    }
    for i in 1..stops.len() {
        if t <= stops[i].t {
            let ratio = (t - stops[i - 1].t) / (stops[i].t - stops[i - 1].t);
            return lerp_color(stops[i - 1].color, stops[i].color, ratio);
        }
    }
    stops[stops.len() - 1].color
}

/// Evaluate a color scheme at normalized position `t` ∈ [0, 1].
pub fn evaluate(scheme: ColorScheme, t: f64) -> Rgb {
    match scheme {
        ColorScheme::Heat => multi_stop(HEAT_STOPS, t),
        ColorScheme::BlueWhiteRed => multi_stop(BLUE_WHITE_RED_STOPS, t),
        ColorScheme::Grayscale => {
            let v = (t.clamp(0.0, 1.0) * 255.0).round() as u8;
            Rgb::new(v, v, v)
        }
    }
}

/// Fixed RGBA colors of the mask classes.
///
/// No-change pixels are fully transparent. Flagged pixels take their class
/// color at an opacity set by their severity grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPalette {
    pub increase: Rgb,
    pub decrease: Rgb,
    /// Pixels without valid data in either image
    pub unclassified: [u8; 4],
    /// Opacity of Low, Moderate and High grades
    pub severity_alpha: [u8; 3],
}

const GAIN: Rgb = Rgb::new(0, 255, 0);
const LOSS: Rgb = Rgb::new(255, 0, 0);
/// Change without a direction
const MODIFIED: Rgb = Rgb::new(255, 255, 0);
const EXPANSION: Rgb = Rgb::new(0, 120, 255);
const RETRACTION: Rgb = Rgb::new(230, 120, 30);

const NO_CHANGE: [u8; 4] = [0, 0, 0, 0];

impl Default for ClassPalette {
    fn default() -> Self {
        Self {
            increase: GAIN,
            decrease: LOSS,
            unclassified: [128, 128, 128, 96],
            severity_alpha: [140, 200, 255],
        }
    }
}

impl ClassPalette {
    /// Palette for the classes `mode` can produce.
    pub fn for_mode(mode: AnalysisMode) -> Self {
        let base = Self::default();
        match mode {
            AnalysisMode::Water => Self {
                increase: EXPANSION,
                decrease: RETRACTION,
                ..base
            },
            AnalysisMode::Deforestation => base,
            AnalysisMode::LandUse | AnalysisMode::Structures | AnalysisMode::Disaster => Self {
                increase: MODIFIED,
                ..base
            },
        }
    }

    /// RGBA of one mask pixel; `None` marks a pixel without valid data.
    pub fn color(&self, class: Option<ChangeClass>, severity: Option<Severity>) -> [u8; 4] {
        let rgb = match class {
            None => return self.unclassified,
            Some(ChangeClass::NoChange) => return NO_CHANGE,
            Some(ChangeClass::Increase) => self.increase,
            Some(ChangeClass::Decrease) => self.decrease,
        };
        let alpha = match severity {
            Some(Severity::Low) => self.severity_alpha[0],
            Some(Severity::Moderate) => self.severity_alpha[1],
            _ => self.severity_alpha[2],
        };
        rgb.with_alpha(alpha)
    }
}
