//! Changed-area statistics
//!
//! Pixel counts and percentages are always available. Ground area needs a
//! georeference: projected grids use the affine cell size, geographic grids
//! the ellipsoidal cell size at each row's latitude, since a constant step in
//! degrees covers less ground towards the poles.

use geoshift_core::change::{ChangeClass, ChangeResult, Severity, SEVERITY_NODATA};
use geoshift_core::{Error, GeoTransform, Raster, Result, CRS};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// WGS84 ellipsoid parameters
const WGS84_A: f64 = 6_378_137.0; // semi-major axis (m)
const WGS84_F: f64 = 1.0 / 298.257_223_563; // flattening

const M2_PER_HECTARE: f64 = 10_000.0;

/// Units requested for area output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaUnits {
    /// Pixel counts and percentages only
    #[default]
    Pixels,
    /// Also ground area in hectares; needs a georeferenced grid
    Hectares,
}

/// Coarse label for how much of a scene changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeExtent {
    /// Under 1% of valid pixels
    Minimal,
    /// Under 10%
    Moderate,
    Significant,
}

impl ChangeExtent {
    pub fn from_percent(percent: f64) -> Self {
        if percent < 1.0 {
            Self::Minimal
        } else if percent < 10.0 {
            Self::Moderate
        } else {
            Self::Significant
        }
    }
}

/// Pixels and area of one mask class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassArea {
    pub class: ChangeClass,
    pub pixels: usize,
    /// Share of valid pixels, 0-100
    pub percent: f64,
    pub hectares: Option<f64>,
}

/// Pixels and area of one severity grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityArea {
    pub severity: Severity,
    pub pixels: usize,
    /// Share of valid pixels, 0-100
    pub percent: f64,
    pub hectares: Option<f64>,
}

/// Summary of a change mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaStats {
    pub changed_pixels: usize,
    /// Pixels with valid data in both images
    pub valid_pixels: usize,
    pub nodata_pixels: usize,
    /// Changed share of valid pixels, 0-100
    pub percent_changed: f64,
    pub changed_hectares: Option<f64>,
    pub valid_hectares: Option<f64>,
    pub by_class: Vec<ClassArea>,
    /// Empty unless summarized from a [`ChangeResult`]
    pub by_severity: Vec<SeverityArea>,
}

impl AreaStats {
    pub fn extent(&self) -> ChangeExtent {
        ChangeExtent::from_percent(self.percent_changed)
    }

    pub fn class(&self, class: ChangeClass) -> Option<&ClassArea> {
        self.by_class.iter().find(|c| c.class == class)
    }

    /// Hectares flagged as increase, gain or expansion.
    pub fn gain_hectares(&self) -> Option<f64> {
        self.class(ChangeClass::Increase).and_then(|c| c.hectares)
    }

    /// Hectares flagged as decrease, loss or retraction.
    pub fn loss_hectares(&self) -> Option<f64> {
        self.class(ChangeClass::Decrease).and_then(|c| c.hectares)
    }
}

/// Ground area in m² of one pixel in each row of a grid.
///
/// Returns `None` for unreferenced grids.
pub fn row_cell_areas(transform: &GeoTransform, crs: Option<&CRS>, rows: usize) -> Option<Vec<f64>> {
    let crs = crs?;
    if transform.is_identity() {
        return None;
    }

    if crs.is_geographic() {
        let (d_lon, d_lat) = transform.resolution();
        Some(
            (0..rows)
                .map(|row| {
                    let (_, lat) = transform.apply(0.5, row as f64 + 0.5);
                    geographic_cell_area(lat, d_lon, d_lat)
                })
                .collect(),
        )
    } else {
        let det = transform.pixel_width * transform.pixel_height
            - transform.row_rotation * transform.col_rotation;
        let unit = crs.linear_unit_metres();
        Some(vec![det.abs() * unit * unit; rows])
    }
}

/// Area in m² of a `d_lon` x `d_lat` degree cell centred at `latitude_deg`.
pub fn geographic_cell_area(latitude_deg: f64, d_lon: f64, d_lat: f64) -> f64 {
    let lat = latitude_deg.to_radians();
    let e2 = 2.0 * WGS84_F - WGS84_F * WGS84_F; // first eccentricity squared
    let w2 = 1.0 - e2 * lat.sin() * lat.sin();

    // Radii of curvature in the prime vertical (N) and the meridian (M)
    let n = WGS84_A / w2.sqrt();
    let m = WGS84_A * (1.0 - e2) / w2.powf(1.5);

    let dx = n * lat.cos() * d_lon.to_radians();
    let dy = m * d_lat.to_radians();
    dx.abs() * dy.abs()
}

#[derive(Default, Clone, Copy)]
struct Tally {
    pixels: usize,
    area: f64,
}

impl Tally {
    fn add(&mut self, area: f64) {
        self.pixels += 1;
        self.area += area;
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn hectares(tally: Tally, georeferenced: bool) -> Option<f64> {
    georeferenced.then(|| tally.area / M2_PER_HECTARE)
}

/// Summarize a class mask on its grid.
///
/// Mask values other than -1, 0 and 1 count as nodata. Asking for
/// [`AreaUnits::Hectares`] on an unreferenced grid fails with
/// `MissingGeoreference`; pixel statistics never need a georeference.
pub fn summarize(
    mask: &Raster<i8>,
    transform: &GeoTransform,
    crs: Option<&CRS>,
    units: AreaUnits,
) -> Result<AreaStats> {
    summarize_with_severity(mask, None, transform, crs, units)
}

/// Summarize a change result, including its severity breakdown.
pub fn summarize_result(result: &ChangeResult, units: AreaUnits) -> Result<AreaStats> {
    let mask = result.mask();
    summarize_with_severity(mask, Some(result.severity()), mask.transform(), mask.crs(), units)
}

fn summarize_with_severity(
    mask: &Raster<i8>,
    severity: Option<&Raster<u8>>,
    transform: &GeoTransform,
    crs: Option<&CRS>,
    units: AreaUnits,
) -> Result<AreaStats> {
    let (rows, cols) = mask.shape();
    if let Some(sev) = severity {
        if sev.shape() != (rows, cols) {
            return Err(Error::ShapeMismatch {
                stage: "summarize",
                expected: (rows, cols),
                actual: sev.shape(),
            });
        }
    }

    let cell_areas = match units {
        AreaUnits::Hectares => {
            Some(row_cell_areas(transform, crs, rows).ok_or(Error::MissingGeoreference)?)
        }
        AreaUnits::Pixels => None,
    };
    let georeferenced = cell_areas.is_some();

    let mut valid = Tally::default();
    let mut nodata = 0usize;
    // Decrease, NoChange, Increase
    let mut classes = [Tally::default(); 3];
    // Low, Moderate, High
    let mut grades = [Tally::default(); 3];

    let data = mask.data();
    for row in 0..rows {
        let area = cell_areas.as_ref().map_or(0.0, |a| a[row]);
        for col in 0..cols {
            let label = data[[row, col]];
            let Some(class) = ChangeClass::from_label(label) else {
                nodata += 1;
                continue;
            };
            valid.add(area);
            classes[(class as i8 + 1) as usize].add(area);

            if let Some(sev) = severity {
                let code = sev.data()[[row, col]];
                if code != SEVERITY_NODATA {
                    if let Some(grade) = Severity::from_code(code).filter(|g| *g != Severity::None) {
                        grades[grade as usize - 1].add(area);
                    }
                }
            }
        }
    }

    let changed = Tally {
        pixels: classes[0].pixels + classes[2].pixels,
        area: classes[0].area + classes[2].area,
    };

    let by_class = [ChangeClass::Decrease, ChangeClass::NoChange, ChangeClass::Increase]
        .into_iter()
        .zip(classes)
        .map(|(class, t)| ClassArea {
            class,
            pixels: t.pixels,
            percent: percent(t.pixels, valid.pixels),
            hectares: hectares(t, georeferenced),
        })
        .collect();

    let by_severity = if severity.is_some() {
        Severity::GRADED
            .into_iter()
            .zip(grades)
            .map(|(severity, t)| SeverityArea {
                severity,
                pixels: t.pixels,
                percent: percent(t.pixels, valid.pixels),
                hectares: hectares(t, georeferenced),
            })
            .collect()
    } else {
        Vec::new()
    };

    let stats = AreaStats {
        changed_pixels: changed.pixels,
        valid_pixels: valid.pixels,
        nodata_pixels: nodata,
        percent_changed: percent(changed.pixels, valid.pixels),
        changed_hectares: hectares(changed, georeferenced),
        valid_hectares: hectares(valid, georeferenced),
        by_class,
        by_severity,
    };
    debug!(
        "Summarized {}x{} mask: {} of {} valid pixels changed ({:.2}%)",
        rows, cols, stats.changed_pixels, stats.valid_pixels, stats.percent_changed
    );
    Ok(stats)
}
