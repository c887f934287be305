//! Multi-band decoded raster owned by one analysis

use crate::crs::CRS;
use crate::raster::GeoTransform;
use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File format a raster was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterFormat {
    GeoTiff,
    Png,
    Jpeg,
}

impl RasterFormat {
    /// Plain images carry no georeference of their own.
    pub fn is_plain_image(&self) -> bool {
        matches!(self, RasterFormat::Png | RasterFormat::Jpeg)
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RasterFormat::GeoTiff => "GeoTIFF",
            RasterFormat::Png => "PNG",
            RasterFormat::Jpeg => "JPEG",
        })
    }
}

/// Whether sample values are measurements or class codes.
///
/// Categorical sources (palette images, class maps) are resampled with
/// nearest neighbour; continuous imagery with bilinear interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleKind {
    #[default]
    Continuous,
    Categorical,
}

/// Full-scale value of 8-bit imagery, the default for handles built in memory.
pub const DEFAULT_VALUE_SCALE: f32 = 255.0;

/// Full-scale value assumed for floating-point samples (reflectance).
pub const FLOAT_VALUE_SCALE: f32 = 1.0;

/// Nominal full-scale value of an integer sample type.
///
/// `2^bits - 1` for unsigned and `2^(bits-1) - 1` for signed samples.
pub fn integer_value_scale(bits: u32, signed: bool) -> f32 {
    let bits = if signed { bits.saturating_sub(1) } else { bits }.clamp(1, 64);
    (2f64.powi(bits as i32) - 1.0) as f32
}

/// Decoded pixel buffer with its georeference.
///
/// Samples are stored band-sequential as `(band, row, col)` in `f32`.
/// A handle is assembled once by the reader through the `with_*` builders
/// and is read-only afterwards.
#[derive(Debug, Clone)]
pub struct RasterHandle {
    data: Array3<f32>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<f32>,
    georeferenced: bool,
    format: RasterFormat,
    kind: SampleKind,
    /// Nominal full-scale sample value of the source encoding
    value_scale: f32,
    path: PathBuf,
}

impl RasterHandle {
    /// Unreferenced handle in the pixel-unit frame.
    pub fn new(data: Array3<f32>, format: RasterFormat, path: impl Into<PathBuf>) -> Self {
        Self {
            data,
            transform: GeoTransform::identity(),
            crs: None,
            nodata: None,
            georeferenced: false,
            format,
            kind: SampleKind::Continuous,
            value_scale: DEFAULT_VALUE_SCALE,
            path: path.into(),
        }
    }

    /// Attach a geotransform read from file metadata.
    pub fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.transform = transform;
        self.georeferenced = true;
        self
    }

    pub fn with_crs(mut self, crs: Option<CRS>) -> Self {
        self.crs = crs;
        self
    }

    pub fn with_nodata(mut self, nodata: Option<f32>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_kind(mut self, kind: SampleKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the full-scale value; non-positive or non-finite values are ignored.
    pub fn with_value_scale(mut self, scale: f32) -> Self {
        if scale.is_finite() && scale > 0.0 {
            self.value_scale = scale;
        }
        self
    }

    /// Number of bands
    pub fn bands(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    /// View of one band.
    ///
    /// # Panics
    /// Panics if `band >= self.bands()`.
    pub fn band(&self, band: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), band)
    }

    /// All samples as `(band, row, col)`.
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    pub fn format(&self) -> RasterFormat {
        self.format
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    /// Full-scale value of the sample encoding (255 for 8-bit, 65535 for
    /// 16-bit, 1 for floating point unless configured otherwise).
    pub fn value_scale(&self) -> f32 {
        self.value_scale
    }

    /// Path the raster was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file carried a geotransform.
    pub fn is_georeferenced(&self) -> bool {
        self.georeferenced
    }

    /// Whether a sample holds real data (not NaN, not the nodata sentinel).
    pub fn is_valid(&self, value: f32) -> bool {
        if value.is_nan() {
            return false;
        }
        match self.nodata {
            Some(nd) => (value - nd).abs() > f32::EPSILON * nd.abs().max(1.0),
            None => true,
        }
    }

    /// Footprint (min_x, min_y, max_x, max_y) in the native CRS.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Bytes held by the decoded buffer.
    pub fn decoded_bytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f32>()) as u64
    }
}
