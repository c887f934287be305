//! Point sampling of source bands at fractional pixel positions

use geoshift_core::Error;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Resampling rule used when a source grid is mapped onto the shared grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    /// Value of the pixel containing the point (categorical sources)
    Nearest,
    /// Distance-weighted mean of the four surrounding pixel centres
    Bilinear,
}

impl FromStr for ResamplingMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" | "near" => Ok(Self::Nearest),
            "bilinear" | "linear" => Ok(Self::Bilinear),
            _ => Err(Error::InvalidParameter {
                name: "resampling",
                value: s.to_string(),
                reason: "expected nearest or bilinear".into(),
            }),
        }
    }
}

impl ResamplingMethod {
    /// Sample `band` at fractional pixel position (`col`, `row`), where
    /// integer coordinates are pixel corners.
    ///
    /// Returns NaN outside the band or where no contributing pixel is valid.
    pub fn sample(
        &self,
        band: &ArrayView2<'_, f32>,
        col: f64,
        row: f64,
        is_valid: impl Fn(f32) -> bool,
    ) -> f32 {
        let (rows, cols) = band.dim();
        if !(col >= 0.0 && row >= 0.0 && col < cols as f64 && row < rows as f64) {
            return f32::NAN;
        }
        match self {
            Self::Nearest => {
                let v = band[[row as usize, col as usize]];
                if is_valid(v) {
                    v
                } else {
                    f32::NAN
                }
            }
            Self::Bilinear => bilinear(band, col - 0.5, row - 0.5, is_valid),
        }
    }
}

/// Bilinear interpolation between pixel centres, clamped at the border.
/// Weights are renormalized over the valid neighbours.
fn bilinear(band: &ArrayView2<'_, f32>, x: f64, y: f64, is_valid: impl Fn(f32) -> bool) -> f32 {
    let (rows, cols) = band.dim();
    let x = x.clamp(0.0, (cols - 1) as f64);
    let y = y.clamp(0.0, (rows - 1) as f64);
    let (c0, r0) = (x.floor() as usize, y.floor() as usize);
    let (c1, r1) = ((c0 + 1).min(cols - 1), (r0 + 1).min(rows - 1));
    let (fx, fy) = (x - c0 as f64, y - r0 as f64);

    let taps = [
        (r0, c0, (1.0 - fx) * (1.0 - fy)),
        (r0, c1, fx * (1.0 - fy)),
        (r1, c0, (1.0 - fx) * fy),
        (r1, c1, fx * fy),
    ];
    let mut sum = 0.0f64;
    let mut weight = 0.0f64;
    for (r, c, w) in taps {
        let v = band[[r, c]];
        if w > 0.0 && is_valid(v) {
            sum += v as f64 * w;
            weight += w;
        }
    }
    if weight > 1e-12 {
        (sum / weight) as f32
    } else {
        f32::NAN
    }
}
