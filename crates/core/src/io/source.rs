//! Lazy raster source: header on open, pixels on demand

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::format::detect_format;
use crate::io::window::Window;
use crate::io::{geotiff, plain};
use crate::raster::{GeoTransform, RasterFormat, RasterHandle, SampleKind, FLOAT_VALUE_SCALE};
use ndarray::s;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default decoded-size budget per raster: 4 GiB.
pub const DEFAULT_MEMORY_BUDGET: u64 = 4 * 1024 * 1024 * 1024;

/// Options controlling how much of a raster is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Upper bound on the decoded `f32` buffer, in bytes.
    pub memory_budget_bytes: u64,
    /// When set, rasters larger than this along either axis are read
    /// decimated so the longer axis fits.
    pub max_dimension: Option<usize>,
    /// Full-scale sample value used to normalize intensity differences.
    /// Defaults to the sample type's range (255 for 8-bit, 65535 for
    /// 16-bit) and to 1.0 for floating-point data.
    pub value_scale: Option<f32>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            max_dimension: None,
            value_scale: None,
        }
    }
}

/// Header-level metadata of an opened raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub format: RasterFormat,
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    /// Geotransform from file metadata; `None` for unreferenced images
    pub transform: Option<GeoTransform>,
    pub crs: Option<CRS>,
    pub nodata: Option<f32>,
    pub kind: SampleKind,
    /// Full-scale sample value of the stored data type
    pub value_scale: f32,
    /// (rows, cols) of one decode unit; the whole image for PNG/JPEG
    pub chunk_shape: (usize, usize),
}

impl RasterInfo {
    /// Decoded size of `rows x cols` across all bands.
    fn bytes_for(&self, rows: usize, cols: usize) -> u64 {
        (rows as u64) * (cols as u64) * (self.bands as u64) * 4
    }

    /// Whether pixels can be decoded piecewise.
    pub fn supports_windowed_reads(&self) -> bool {
        self.format == RasterFormat::GeoTiff
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Tiff(geotiff::TiffInfo),
    Plain,
}

/// An opened raster file.
///
/// Opening only parses the header. Pixel data is decoded by [`read`],
/// [`read_window`] or [`read_decimated`], each of which reopens the file,
/// so a source can be shared freely between threads.
///
/// [`read`]: RasterSource::read
/// [`read_window`]: RasterSource::read_window
/// [`read_decimated`]: RasterSource::read_decimated
#[derive(Debug, Clone)]
pub struct RasterSource {
    path: PathBuf,
    info: RasterInfo,
    options: ReadOptions,
    backend: Backend,
}

impl RasterSource {
    /// Sniff the format and parse the header of `path`.
    pub fn open(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let budget = options.memory_budget_bytes;

        let (info, backend) = match format {
            RasterFormat::GeoTiff => {
                let t = geotiff::read_header(path, budget)?;
                let info = RasterInfo {
                    format,
                    rows: t.rows,
                    cols: t.cols,
                    bands: t.bands,
                    transform: t.transform,
                    crs: t.crs.clone(),
                    nodata: t.nodata,
                    kind: t.kind,
                    value_scale: sample_scale(t.sample_scale, &options),
                    chunk_shape: (t.chunk_rows, t.chunk_cols),
                };
                (info, Backend::Tiff(t))
            }
            RasterFormat::Png | RasterFormat::Jpeg => {
                let p = plain::read_header(path, format, budget)?;
                let info = RasterInfo {
                    format,
                    rows: p.rows,
                    cols: p.cols,
                    bands: p.bands,
                    transform: None,
                    crs: None,
                    nodata: None,
                    kind: SampleKind::Continuous,
                    value_scale: sample_scale(p.sample_scale, &options),
                    chunk_shape: (p.rows, p.cols),
                };
                (info, Backend::Plain)
            }
        };

        info!(
            "Opened {} ({}, {}x{}x{}, crs {})",
            path.display(),
            info.format,
            info.rows,
            info.cols,
            info.bands,
            info.crs.as_ref().map(CRS::identifier).unwrap_or_else(|| "none".into())
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            options,
            backend,
        })
    }

    pub fn info(&self) -> &RasterInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the whole raster.
    ///
    /// With `max_dimension` set, oversized rasters are decimated to fit;
    /// otherwise a raster whose decoded size exceeds the budget fails with
    /// `ResourceExceeded`.
    pub fn read(&self) -> Result<RasterHandle> {
        if let Some(max_dim) = self.options.max_dimension {
            if self.info.rows.max(self.info.cols) > max_dim {
                return self.read_decimated(max_dim);
            }
        }
        self.read_region(Window::full(self.info.rows, self.info.cols), 1)
    }

    /// Decode a pixel window. GeoTIFFs decode only the intersecting chunks.
    pub fn read_window(&self, window: Window) -> Result<RasterHandle> {
        let clipped = window.clipped(self.info.rows, self.info.cols);
        if clipped.is_empty() {
            return Err(Error::InvalidParameter {
                name: "window",
                value: format!("{:?}", window),
                reason: format!("outside raster of {}x{}", self.info.rows, self.info.cols),
            });
        }
        self.read_region(clipped, 1)
    }

    /// Decode the raster keeping every k-th sample so that the longer axis
    /// is at most `max_dim` pixels.
    pub fn read_decimated(&self, max_dim: usize) -> Result<RasterHandle> {
        let longest = self.info.rows.max(self.info.cols);
        let step = longest.div_ceil(max_dim.max(1)).max(1);
        self.read_region(Window::full(self.info.rows, self.info.cols), step)
    }

    fn read_region(&self, window: Window, step: usize) -> Result<RasterHandle> {
        let budget = self.options.memory_budget_bytes;
        let (out_rows, out_cols) = window.decimated_shape(step);

        let data = match &self.backend {
            Backend::Tiff(t) => {
                self.check_budget(self.info.bytes_for(out_rows, out_cols))?;
                geotiff::read_region(&self.path, t, &window, step, budget)?
            }
            Backend::Plain => {
                // No piecewise decoding: the full image is always materialized.
                self.check_budget(self.info.bytes_for(self.info.rows, self.info.cols))?;
                let full = plain::decode(&self.path, self.info.format, budget)?;
                let step = step as isize;
                full.slice(s![
                    ..,
                    window.row_off..window.row_end();step,
                    window.col_off..window.col_end();step
                ])
                .to_owned()
            }
        };
        debug!("{}: read {:?} step {} -> {:?}", self.path.display(), window, step, data.dim());

        let mut handle = RasterHandle::new(data, self.info.format, &self.path)
            .with_nodata(self.info.nodata)
            .with_kind(self.info.kind)
            .with_value_scale(self.info.value_scale);
        if let Some(transform) = self.info.transform {
            let windowed = transform.window(window.row_off, window.col_off);
            handle = handle
                .with_transform(windowed.decimated(step))
                .with_crs(self.info.crs.clone());
        }
        Ok(handle)
    }

    fn check_budget(&self, required: u64) -> Result<()> {
        let budget = self.options.memory_budget_bytes;
        if required > budget {
            return Err(Error::ResourceExceeded {
                path: self.path.clone(),
                required_bytes: required,
                budget_bytes: budget,
            });
        }
        Ok(())
    }
}

fn sample_scale(native: Option<f32>, options: &ReadOptions) -> f32 {
    options
        .value_scale
        .filter(|s| s.is_finite() && *s > 0.0)
        .or(native)
        .unwrap_or(FLOAT_VALUE_SCALE)
}

/// Open and fully decode a raster (the one-shot form of [`RasterSource`]).
pub fn open(path: impl AsRef<Path>, options: ReadOptions) -> Result<RasterHandle> {
    RasterSource::open(path, options)?.read()
}
