//! Edge detection and edge density

use crate::collect_grid;
use crate::maybe_rayon::*;
use geoshift_core::Result;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Largest Sobel magnitude for inputs in [0, 1]: `sqrt(4² + 4²)`.
const SOBEL_MAX: f32 = 4.0 * std::f32::consts::SQRT_2;

/// Sobel gradient magnitude, scaled to [0, 1] for inputs in [0, 1].
///
/// `G = sqrt(Gx² + Gy²) / (4·√2)`
///
/// Border pixels reuse the nearest row/column, and NaN neighbours take the
/// centre value, so only NaN centres produce NaN output.
pub fn sobel_magnitude(gray: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    let (rows, cols) = gray.dim();

    let data: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f32::NAN; cols];
            for col in 0..cols {
                let centre = gray[[row, col]];
                if centre.is_nan() {
                    continue;
                }
                let z = |dr: isize, dc: isize| -> f32 {
                    let r = (row as isize + dr).clamp(0, rows as isize - 1) as usize;
                    let c = (col as isize + dc).clamp(0, cols as isize - 1) as usize;
                    let v = gray[[r, c]];
                    if v.is_nan() {
                        centre
                    } else {
                        v
                    }
                };

                let z1 = z(-1, -1);
                let z2 = z(-1, 0);
                let z3 = z(-1, 1);
                let z4 = z(0, -1);
                let z6 = z(0, 1);
                let z7 = z(1, -1);
                let z8 = z(1, 0);
                let z9 = z(1, 1);

                let gx = (z3 + 2.0 * z6 + z9) - (z1 + 2.0 * z4 + z7);
                let gy = (z7 + 2.0 * z8 + z9) - (z1 + 2.0 * z2 + z3);

                row_data[col] = (gx * gx + gy * gy).sqrt() / SOBEL_MAX;
            }
            row_data
        })
        .collect();

    collect_grid(rows, cols, data, "sobel")
}

/// Parameters for [`edge_density`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDensityParams {
    /// Half-width of the square averaging window
    pub radius: usize,
}

impl Default for EdgeDensityParams {
    fn default() -> Self {
        Self { radius: 2 }
    }
}

/// Mean gradient magnitude over a `(2r+1)²` window of valid pixels.
pub fn edge_density(magnitude: ArrayView2<'_, f32>, params: EdgeDensityParams) -> Result<Array2<f32>> {
    let (rows, cols) = magnitude.dim();
    let r = params.radius;

    let data: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f32::NAN; cols];
            let (r0, r1) = (row.saturating_sub(r), (row + r).min(rows - 1));
            for col in 0..cols {
                if magnitude[[row, col]].is_nan() {
                    continue;
                }
                let (c0, c1) = (col.saturating_sub(r), (col + r).min(cols - 1));
                let mut sum = 0.0f64;
                let mut n = 0usize;
                for rr in r0..=r1 {
                    for cc in c0..=c1 {
                        let v = magnitude[[rr, cc]];
                        if !v.is_nan() {
                            sum += v as f64;
                            n += 1;
                        }
                    }
                }
                row_data[col] = (sum / n as f64) as f32;
            }
            row_data
        })
        .collect();

    collect_grid(rows, cols, data, "edge density")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn flat_surface_has_no_edges() {
        let gray = Array2::from_elem((5, 5), 0.4f32);
        let mag = sobel_magnitude(gray.view()).unwrap();
        assert!(mag.iter().all(|&v| v.abs() < 1e-7));
    }

    #[test]
    fn step_edge_peaks_at_boundary() {
        let gray = Array2::from_shape_fn((5, 6), |(_, c)| if c < 3 { 0.0f32 } else { 1.0 });
        let mag = sobel_magnitude(gray.view()).unwrap();
        // Horizontal step: gx = 4 at the boundary, gy = 0
        assert_relative_eq!(mag[[2, 2]], 4.0 / SOBEL_MAX, epsilon = 1e-6);
        assert_relative_eq!(mag[[2, 3]], 4.0 / SOBEL_MAX, epsilon = 1e-6);
        assert!(mag[[2, 0]].abs() < 1e-7);
        assert!(mag.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn nan_centre_stays_nan() {
        let mut gray = Array2::from_elem((3, 3), 0.5f32);
        gray[[1, 1]] = f32::NAN;
        let mag = sobel_magnitude(gray.view()).unwrap();
        assert!(mag[[1, 1]].is_nan());
        assert!(mag[[0, 0]].abs() < 1e-7);
    }

    #[test]
    fn density_is_local_mean() {
        let mut mag = Array2::zeros((5, 5));
        mag[[2, 2]] = 1.0f32;
        let d = edge_density(mag.view(), EdgeDensityParams { radius: 1 }).unwrap();
        assert_relative_eq!(d[[2, 2]], 1.0 / 9.0, epsilon = 1e-6);
        assert_relative_eq!(d[[1, 1]], 1.0 / 9.0, epsilon = 1e-6);
        assert_relative_eq!(d[[3, 3]], 1.0 / 9.0, epsilon = 1e-6);
        // Corner window is clipped to 2x2 and misses the peak
        assert_relative_eq!(d[[0, 0]], 0.0);
    }
}
