//! Change masks and score rasters to RGBA overlays.

use crate::scheme::{evaluate, ClassPalette, ColorScheme, Rgb};
use geoshift_core::change::{ChangeClass, ChangeResult, Severity, ThresholdPolicy};
use geoshift_core::raster::{Raster, RasterElement};
use geoshift_core::{Error, Result};

/// Row-major RGBA pixel buffer, `rows * cols * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayImage {
    rows: usize,
    cols: usize,
    rgba: Vec<u8>,
}

impl OverlayImage {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn pixel(&self, row: usize, col: usize) -> Option<[u8; 4]> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let i = (row * self.cols + col) * 4;
        Some([self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.rgba
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.rgba
    }

    /// Pixels with non-zero alpha.
    pub fn opaque_count(&self) -> usize {
        self.rgba.chunks_exact(4).filter(|px| px[3] > 0).count()
    }
}

/// Render a change result with the palette of its mode.
pub fn render(result: &ChangeResult) -> Result<OverlayImage> {
    render_mask(
        result.mask(),
        result.severity(),
        &ClassPalette::for_mode(result.mode()),
    )
}

/// Render a class mask and its severity grades.
pub fn render_mask(
    mask: &Raster<i8>,
    severity: &Raster<u8>,
    palette: &ClassPalette,
) -> Result<OverlayImage> {
    let (rows, cols) = mask.shape();
    if severity.shape() != (rows, cols) {
        return Err(Error::ShapeMismatch {
            stage: "render",
            expected: (rows, cols),
            actual: severity.shape(),
        });
    }

    let mut rgba = Vec::with_capacity(rows * cols * 4);
    for (&label, &grade) in mask.data().iter().zip(severity.data().iter()) {
        let px = palette.color(ChangeClass::from_label(label), Severity::from_code(grade));
        rgba.extend_from_slice(&px);
    }

    Ok(OverlayImage { rows, cols, rgba })
}

/// Parameters for rendering a continuous raster.
#[derive(Debug, Clone)]
pub struct ColormapParams {
    pub scheme: ColorScheme,
    /// Values at or below map to the start of the ramp
    pub min: f64,
    /// Values at or above map to the end of the ramp
    pub max: f64,
    /// Color for nodata pixels (RGBA). Default: fully transparent.
    pub nodata_color: [u8; 4],
}

impl ColormapParams {
    pub fn with_range(scheme: ColorScheme, min: f64, max: f64) -> Self {
        Self {
            scheme,
            min,
            max,
            nodata_color: [0, 0, 0, 0],
        }
    }

    /// Range that keeps the threshold visible for scores of `policy`.
    ///
    /// Magnitude scores span `[0, 2t]`; signed scores `[-2t, 2t]`, so zero
    /// sits at the centre of a divergent ramp.
    pub fn for_scores(policy: ThresholdPolicy, threshold: f32) -> Self {
        let t = (threshold as f64).max(f64::EPSILON) * 2.0;
        let min = match policy {
            ThresholdPolicy::Magnitude => 0.0,
            ThresholdPolicy::DecreaseOnly | ThresholdPolicy::Signed => -t,
        };
        Self::with_range(ColorScheme::for_policy(policy), min, t)
    }
}

/// Detect min/max from the valid cells of a raster.
pub fn auto_params<T: RasterElement>(raster: &Raster<T>, scheme: ColorScheme) -> ColormapParams {
    let nodata = raster.nodata();
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for val in raster.data().iter() {
        if val.is_nodata(nodata) {
            continue;
        }
        if let Some(v) = val.to_f64().filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
        }
    }

    // All nodata or constant raster
    if !min.is_finite() || !max.is_finite() {
        min = 0.0;
        max = 1.0;
    } else if (max - min).abs() < f64::EPSILON {
        max = min + 1.0;
    }

    ColormapParams::with_range(scheme, min, max)
}

/// Render a continuous raster, e.g. a change score, as an opaque heatmap.
///
/// Nodata pixels are rendered with `params.nodata_color`.
pub fn raster_to_rgba<T: RasterElement>(raster: &Raster<T>, params: &ColormapParams) -> OverlayImage {
    let (rows, cols) = raster.shape();
    let nodata = raster.nodata();
    let range = params.max - params.min;
    let inv_range = if range.abs() > f64::EPSILON {
        1.0 / range
    } else {
        1.0
    };

    let mut rgba = Vec::with_capacity(rows * cols * 4);
    for val in raster.data().iter() {
        let px = match val.to_f64() {
            Some(v) if v.is_finite() && !val.is_nodata(nodata) => {
                let Rgb { r, g, b } = evaluate(params.scheme, (v - params.min) * inv_range);
                [r, g, b, 255]
            }
            _ => params.nodata_color,
        };
        rgba.extend_from_slice(&px);
    }

    OverlayImage { rows, cols, rgba }
}
