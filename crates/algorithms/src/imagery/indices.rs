//! Spectral vegetation and water proxies
//!
//! Indices are computed per image from a `(band, row, col)` buffer and a
//! [`BandMapping`]. When no near-infrared band is available the visible
//! counterparts are used.

use crate::collect_grid;
use crate::maybe_rayon::*;
use geoshift_core::{Error, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Which band holds which spectral channel (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandMapping {
    pub red: usize,
    pub green: usize,
    pub blue: usize,
    /// Near-infrared, when the sensor has one
    pub nir: Option<usize>,
}

impl Default for BandMapping {
    fn default() -> Self {
        Self {
            red: 0,
            green: 1,
            blue: 2,
            nir: Some(3),
        }
    }
}

impl BandMapping {
    /// Conventional layout for a raster with `bands` bands: R,G,B[,NIR].
    ///
    /// Returns `None` below three bands, where no colour index can be formed.
    pub fn for_band_count(bands: usize) -> Option<Self> {
        match bands {
            0..=2 => None,
            3 => Some(Self {
                nir: None,
                ..Self::default()
            }),
            _ => Some(Self::default()),
        }
    }

    /// Check every mapped band exists.
    pub fn validate(&self, bands: usize) -> Result<()> {
        let mut named = vec![("red", self.red), ("green", self.green), ("blue", self.blue)];
        if let Some(nir) = self.nir {
            named.push(("nir", nir));
        }
        for (name, index) in named {
            if index >= bands {
                return Err(Error::InvalidParameter {
                    name: "band_mapping",
                    value: format!("{}={}", name, index),
                    reason: format!("raster has {} bands", bands),
                });
            }
        }
        Ok(())
    }
}

/// Normalized-difference index used as a vegetation or water proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectralIndex {
    /// `(NIR - Red) / (NIR + Red)`
    NDVI,
    /// Visible vegetation proxy `(Green - Red) / (Green + Red)`
    NGRDI,
    /// McFeeters water index `(Green - NIR) / (Green + NIR)`
    NDWI,
    /// Visible water proxy `(Blue - Red) / (Blue + Red)`
    BlueRedWater,
}

impl SpectralIndex {
    /// Best vegetation index the mapping supports.
    pub fn vegetation(mapping: &BandMapping) -> Self {
        if mapping.nir.is_some() {
            Self::NDVI
        } else {
            Self::NGRDI
        }
    }

    /// Best water index the mapping supports.
    pub fn water(mapping: &BandMapping) -> Self {
        if mapping.nir.is_some() {
            Self::NDWI
        } else {
            Self::BlueRedWater
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NDVI => "NDVI",
            Self::NGRDI => "NGRDI",
            Self::NDWI => "NDWI",
            Self::BlueRedWater => "blue-red water proxy",
        }
    }

    /// (positive, negative) band indices of the normalized difference.
    fn operands(&self, mapping: &BandMapping) -> Result<(usize, usize)> {
        let nir = || {
            mapping.nir.ok_or_else(|| Error::InvalidParameter {
                name: "band_mapping",
                value: "nir=none".into(),
                reason: format!("{} needs a near-infrared band", self.name()),
            })
        };
        Ok(match self {
            Self::NDVI => (nir()?, mapping.red),
            Self::NGRDI => (mapping.green, mapping.red),
            Self::NDWI => (mapping.green, nir()?),
            Self::BlueRedWater => (mapping.blue, mapping.red),
        })
    }

    /// Compute this index over an image buffer.
    pub fn compute(&self, image: &Array3<f32>, mapping: &BandMapping) -> Result<Array2<f32>> {
        mapping.validate(image.len_of(Axis(0)))?;
        let (a, b) = self.operands(mapping)?;
        normalized_difference(image.index_axis(Axis(0), a), image.index_axis(Axis(0), b))
    }
}

/// `(a - b) / (a + b)` per pixel.
///
/// NaN where either sample is NaN. A zero sum (both bands dark) has no
/// contrast and yields 0.
pub fn normalized_difference(a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    let (rows, cols) = a.dim();

    let data: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f32::NAN; cols];
            for col in 0..cols {
                let (va, vb) = (a[[row, col]], b[[row, col]]);
                if va.is_nan() || vb.is_nan() {
                    continue;
                }
                let sum = va + vb;
                row_data[col] = if sum.abs() < 1e-10 { 0.0 } else { (va - vb) / sum };
            }
            row_data
        })
        .collect();

    collect_grid(rows, cols, data, "normalized difference")
}
