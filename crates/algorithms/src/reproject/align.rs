//! Alignment of two rasters onto one shared grid

use super::projection::Projector;
use super::resample::ResamplingMethod;
use crate::maybe_rayon::*;
use geoshift_core::error::Bounds;
use geoshift_core::io::DEFAULT_MEMORY_BUDGET;
use geoshift_core::raster::{SampleKind, DEFAULT_VALUE_SCALE};
use geoshift_core::{Error, GeoTransform, RasterHandle, Result, CRS};
use ndarray::{s, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which footprint the shared grid covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FootprintPolicy {
    /// Area covered by both rasters
    #[default]
    Intersection,
    /// Area covered by either raster; uncovered pixels are nodata
    Union,
}

/// Parameters for [`align`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignParams {
    /// CRS of the shared grid
    pub target_crs: CRS,
    pub footprint: FootprintPolicy,
    /// Overrides the per-source choice (nearest for categorical, bilinear otherwise)
    pub resampling: Option<ResamplingMethod>,
    /// CRS to assume for the before raster, taking precedence over file metadata
    pub before_crs: Option<CRS>,
    /// CRS to assume for the after raster, taking precedence over file metadata
    pub after_crs: Option<CRS>,
    /// Upper bound on the two aligned `f32` buffers together, in bytes
    pub memory_budget_bytes: u64,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            target_crs: CRS::wgs84(),
            footprint: FootprintPolicy::Intersection,
            resampling: None,
            before_crs: None,
            after_crs: None,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
        }
    }
}

/// Two rasters sampled on the same grid.
///
/// Both buffers are `(band, row, col)` with identical shape; invalid
/// samples are NaN. Plain images align in the pixel-unit frame with no CRS.
#[derive(Debug, Clone)]
pub struct AlignedPair {
    before: Array3<f32>,
    after: Array3<f32>,
    transform: GeoTransform,
    crs: Option<CRS>,
    value_scale: f32,
}

impl AlignedPair {
    pub fn new(
        before: Array3<f32>,
        after: Array3<f32>,
        transform: GeoTransform,
        crs: Option<CRS>,
    ) -> Result<Self> {
        if before.dim() != after.dim() {
            let (_, br, bc) = before.dim();
            let (_, ar, ac) = after.dim();
            return Err(Error::ShapeMismatch {
                stage: "align",
                expected: (br, bc),
                actual: (ar, ac),
            });
        }
        Ok(Self {
            before,
            after,
            transform,
            crs,
            value_scale: DEFAULT_VALUE_SCALE,
        })
    }

    /// Set the full-scale sample value; non-positive values are ignored.
    pub fn with_value_scale(mut self, scale: f32) -> Self {
        if scale.is_finite() && scale > 0.0 {
            self.value_scale = scale;
        }
        self
    }

    /// Full-scale sample value that intensity differences are divided by.
    pub fn value_scale(&self) -> f32 {
        self.value_scale
    }

    pub fn before(&self) -> &Array3<f32> {
        &self.before
    }

    pub fn after(&self) -> &Array3<f32> {
        &self.after
    }

    pub fn before_band(&self, band: usize) -> ArrayView2<'_, f32> {
        self.before.index_axis(Axis(0), band)
    }

    pub fn after_band(&self, band: usize) -> ArrayView2<'_, f32> {
        self.after.index_axis(Axis(0), band)
    }

    pub fn bands(&self) -> usize {
        self.before.len_of(Axis(0))
    }

    /// (rows, cols) of the shared grid.
    pub fn shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.before.dim();
        (rows, cols)
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Whether the grid is in geographic space (false for plain images).
    pub fn is_georeferenced(&self) -> bool {
        self.crs.is_some()
    }

    /// Footprint of the shared grid.
    pub fn bounds(&self) -> Bounds {
        let (rows, cols) = self.shape();
        self.transform.bounds(cols, rows)
    }
}

/// Bring `before` and `after` onto one grid.
///
/// Georeferenced inputs are reprojected into `params.target_crs` and sampled
/// on a grid covering the intersection (or union) of their footprints, at the
/// coarser of the two resolutions. Two plain images are compared pixel for
/// pixel, resized to the smaller of the two when their dimensions differ.
pub fn align(before: &RasterHandle, after: &RasterHandle, params: &AlignParams) -> Result<AlignedPair> {
    let value_scale = before.value_scale().max(after.value_scale());
    match (before.is_georeferenced(), after.is_georeferenced()) {
        (false, false) => {
            return align_plain(before, after, params).map(|p| p.with_value_scale(value_scale))
        }
        (true, false) => return Err(Error::CrsUndefined { path: after.path().to_path_buf() }),
        (false, true) => return Err(Error::CrsUndefined { path: before.path().to_path_buf() }),
        (true, true) => {}
    }

    let target = &params.target_crs;
    let before_crs = resolve_crs(before, params.before_crs.as_ref())?;
    let after_crs = resolve_crs(after, params.after_crs.as_ref())?;

    let before_fp = Projector::new(&before_crs, target)?.project_bounds(before.bounds())?;
    let after_fp = Projector::new(&after_crs, target)?.project_bounds(after.bounds())?;
    debug!("footprints in {}: before {:?}, after {:?}", target, before_fp, after_fp);

    let footprint = match params.footprint {
        FootprintPolicy::Intersection => intersect(before_fp, after_fp),
        FootprintPolicy::Union => Some(union(before_fp, after_fp)),
    }
    .ok_or(Error::NoOverlap {
        before: before_fp,
        after: after_fp,
    })?;

    let (res_bx, res_by) = footprint_resolution(before_fp, before.shape());
    let (res_ax, res_ay) = footprint_resolution(after_fp, after.shape());
    let (transform, rows, cols) = shared_grid(footprint, res_bx.max(res_ax), res_by.max(res_ay));
    info!(
        "Shared grid {}x{} in {} at {:.6}x{:.6}",
        rows,
        cols,
        target,
        transform.pixel_width,
        -transform.pixel_height
    );

    let bands = before.bands().min(after.bands());
    check_grid_budget(before, (bands, rows, cols), params.memory_budget_bytes)?;
    let before_out = warp(before, &before_crs, target, &transform, rows, cols, bands, params)?;
    let after_out = warp(after, &after_crs, target, &transform, rows, cols, bands, params)?;

    Ok(AlignedPair::new(before_out, after_out, transform, Some(target.clone()))?
        .with_value_scale(value_scale))
}

/// Fail before allocating when the two aligned buffers would exceed `budget`.
fn check_grid_budget(src: &RasterHandle, (bands, rows, cols): (usize, usize, usize), budget: u64) -> Result<()> {
    let required = [bands, rows, cols, 4, 2]
        .iter()
        .try_fold(1u64, |acc, &n| acc.checked_mul(n as u64));
    match required {
        Some(bytes) if bytes <= budget => Ok(()),
        required => Err(Error::ResourceExceeded {
            path: src.path().to_path_buf(),
            required_bytes: required.unwrap_or(u64::MAX),
            budget_bytes: budget,
        }),
    }
}

fn resolve_crs(handle: &RasterHandle, override_crs: Option<&CRS>) -> Result<CRS> {
    override_crs
        .or(handle.crs())
        .cloned()
        .ok_or_else(|| Error::CrsUndefined {
            path: handle.path().to_path_buf(),
        })
}

fn intersect(a: Bounds, b: Bounds) -> Option<Bounds> {
    let out = (a.0.max(b.0), a.1.max(b.1), a.2.min(b.2), a.3.min(b.3));
    (out.0 < out.2 && out.1 < out.3).then_some(out)
}

fn union(a: Bounds, b: Bounds) -> Bounds {
    (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3))
}

/// Ground sample distance of a raster whose projected footprint is `fp`.
fn footprint_resolution(fp: Bounds, (rows, cols): (usize, usize)) -> (f64, f64) {
    ((fp.2 - fp.0) / cols.max(1) as f64, (fp.3 - fp.1) / rows.max(1) as f64)
}

/// North-up grid covering `fp` with pixels no finer than (`res_x`, `res_y`).
fn shared_grid(fp: Bounds, res_x: f64, res_y: f64) -> (GeoTransform, usize, usize) {
    let (width, height) = (fp.2 - fp.0, fp.3 - fp.1);
    // `as` saturates, so absurd extents reach the budget check as usize::MAX.
    let cols = ((width / res_x).round() as usize).max(1);
    let rows = ((height / res_y).round() as usize).max(1);
    let transform = GeoTransform::new(fp.0, fp.3, width / cols as f64, -height / rows as f64);
    (transform, rows, cols)
}

fn resampling_for(handle: &RasterHandle, params: &AlignParams) -> ResamplingMethod {
    params.resampling.unwrap_or(match handle.kind() {
        SampleKind::Categorical => ResamplingMethod::Nearest,
        SampleKind::Continuous => ResamplingMethod::Bilinear,
    })
}

/// Sample `bands` bands of `src` at the pixel centres of the target grid.
#[allow(clippy::too_many_arguments)]
fn warp(
    src: &RasterHandle,
    src_crs: &CRS,
    target: &CRS,
    transform: &GeoTransform,
    rows: usize,
    cols: usize,
    bands: usize,
    params: &AlignParams,
) -> Result<Array3<f32>> {
    if src_crs.is_equivalent(target) && *src.transform() == *transform && src.shape() == (rows, cols) {
        debug!("{}: already on the shared grid", src.path().display());
        return Ok(valid_samples(src, bands));
    }

    let method = resampling_for(src, params);
    let inverse = Projector::new(target, src_crs)?;
    let src_transform = src.transform();
    let is_valid = |v: f32| src.is_valid(v);
    let views: Vec<ArrayView2<'_, f32>> = (0..bands).map(|b| src.band(b)).collect();

    let data: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f32::NAN; bands * cols];
            for col in 0..cols {
                let (x, y) = transform.pixel_to_geo(col, row);
                // Points outside the source projection's domain stay nodata.
                let Ok((sx, sy)) = inverse.project(x, y) else {
                    continue;
                };
                let (pc, pr) = src_transform.geo_to_pixel(sx, sy);
                for (b, view) in views.iter().enumerate() {
                    row_data[b * cols + col] = method.sample(view, pc, pr, is_valid);
                }
            }
            row_data
        })
        .collect();
    debug!("{}: warped with {:?}", src.path().display(), method);
    band_major(data, bands, rows, cols)
}

/// Rebuild `(band, row, col)` from rows laid out as `[band][col]`.
fn band_major(data: Vec<f32>, bands: usize, rows: usize, cols: usize) -> Result<Array3<f32>> {
    let len = data.len();
    let by_row = Array3::from_shape_vec((rows, bands, cols), data).map_err(|_| Error::ShapeMismatch {
        stage: "align",
        expected: (rows, cols),
        actual: (len / (bands * cols).max(1), cols),
    })?;
    Ok(by_row.permuted_axes([1, 0, 2]).as_standard_layout().into_owned())
}

/// Copy of the first `bands` bands with nodata sentinels replaced by NaN.
fn valid_samples(src: &RasterHandle, bands: usize) -> Array3<f32> {
    src.data()
        .slice(s![0..bands, .., ..])
        .mapv(|v| if src.is_valid(v) { v } else { f32::NAN })
}

fn align_plain(before: &RasterHandle, after: &RasterHandle, params: &AlignParams) -> Result<AlignedPair> {
    let bands = before.bands().min(after.bands());
    if before.shape() == after.shape() {
        return AlignedPair::new(
            valid_samples(before, bands),
            valid_samples(after, bands),
            GeoTransform::identity(),
            None,
        );
    }

    let rows = before.rows().min(after.rows());
    let cols = before.cols().min(after.cols());
    info!(
        "Plain images differ in size ({:?} vs {:?}); resizing both to {}x{}",
        before.shape(),
        after.shape(),
        rows,
        cols
    );
    AlignedPair::new(
        resize(before, rows, cols, bands, params)?,
        resize(after, rows, cols, bands, params)?,
        GeoTransform::identity(),
        None,
    )
}

/// Resample an unreferenced image to `rows` x `cols` in pixel space.
fn resize(
    src: &RasterHandle,
    rows: usize,
    cols: usize,
    bands: usize,
    params: &AlignParams,
) -> Result<Array3<f32>> {
    if src.shape() == (rows, cols) {
        return Ok(valid_samples(src, bands));
    }
    let method = resampling_for(src, params);
    let sx = src.cols() as f64 / cols as f64;
    let sy = src.rows() as f64 / rows as f64;
    let is_valid = |v: f32| src.is_valid(v);
    let views: Vec<ArrayView2<'_, f32>> = (0..bands).map(|b| src.band(b)).collect();

    let data: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let pr = (row as f64 + 0.5) * sy;
            let mut row_data = vec![f32::NAN; bands * cols];
            for (b, view) in views.iter().enumerate() {
                for col in 0..cols {
                    let pc = (col as f64 + 0.5) * sx;
                    row_data[b * cols + col] = method.sample(view, pc, pr, is_valid);
                }
            }
            row_data
        })
        .collect();
    band_major(data, bands, rows, cols)
}
