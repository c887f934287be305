//! Deterministic per-mode change scores
//!
//! Intensity scores are divided by the nominal full scale of the sample type
//! (255 for 8-bit, 65535 for 16-bit, 1 for reflectance), so a threshold means
//! the same absolute difference whatever the contrast of the scene.

use crate::collect_grid;
use crate::imagery::{BandMapping, SpectralIndex};
use crate::maybe_rayon::*;
use crate::reproject::AlignedPair;
use crate::texture::{edge_density, sobel_magnitude, EdgeDensityParams};
use geoshift_core::Result;
use ndarray::{Array2, Array3, Axis, Zip};

const STRUCTURE_EDGE_WEIGHT: f32 = 0.6;
const STRUCTURE_INTENSITY_WEIGHT: f32 = 0.4;
const DISASTER_INTENSITY_WEIGHT: f32 = 0.7;
const DISASTER_TEXTURE_WEIGHT: f32 = 0.3;

/// Validity mask and value scale shared by all scores of one pair.
pub(crate) struct Scene<'a> {
    pub pair: &'a AlignedPair,
    /// Pixels where every band of both images holds data
    pub valid: Array2<bool>,
    pub scale: f32,
}

impl<'a> Scene<'a> {
    pub fn new(pair: &'a AlignedPair) -> Self {
        let (rows, cols) = pair.shape();
        let mut valid = Array2::from_elem((rows, cols), true);
        for image in [pair.before(), pair.after()] {
            for band in image.axis_iter(Axis(0)) {
                Zip::from(&mut valid).and(&band).for_each(|v, &x| *v &= x.is_finite());
            }
        }

        Self {
            pair,
            valid,
            scale: pair.value_scale(),
        }
    }

    pub fn bands(&self) -> usize {
        self.pair.bands()
    }

    /// Evaluate `f(row, col)` on valid pixels, NaN elsewhere.
    fn per_pixel<F>(&self, f: F) -> Result<Array2<f32>>
    where
        F: Fn(usize, usize) -> f32 + Send + Sync,
    {
        let (rows, cols) = self.pair.shape();
        let valid = &self.valid;

        let data: Vec<f32> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![f32::NAN; cols];
                for col in 0..cols {
                    if valid[[row, col]] {
                        row_data[col] = f(row, col);
                    }
                }
                row_data
            })
            .collect();

        collect_grid(rows, cols, data, "change score")
    }

    /// Band-mean intensity as a fraction of full scale.
    fn gray(&self, image: &Array3<f32>) -> Result<Array2<f32>> {
        let bands = self.bands() as f32;
        self.per_pixel(|r, c| {
            let mean = image.index_axis(Axis(1), r).column(c).sum() / bands;
            mean / self.scale
        })
    }

    fn edges(&self, image: &Array3<f32>, params: EdgeDensityParams) -> Result<Array2<f32>> {
        let gray = self.gray(image)?;
        let magnitude = sobel_magnitude(gray.view())?;
        edge_density(magnitude.view(), params)
    }
}

/// Mean absolute band difference.
pub(crate) fn land_use(scene: &Scene<'_>) -> Result<Array2<f32>> {
    let (before, after) = (scene.pair.before(), scene.pair.after());
    let bands = scene.bands();
    scene.per_pixel(|r, c| {
        let mut sum = 0.0f32;
        for b in 0..bands {
            sum += (after[[b, r, c]] - before[[b, r, c]]).abs();
        }
        sum / bands as f32 / scene.scale
    })
}

/// Signed band-mean difference, `after - before`.
pub(crate) fn signed_intensity(scene: &Scene<'_>) -> Result<Array2<f32>> {
    let (before, after) = (scene.pair.before(), scene.pair.after());
    let bands = scene.bands();
    scene.per_pixel(|r, c| {
        let mut sum = 0.0f32;
        for b in 0..bands {
            sum += after[[b, r, c]] - before[[b, r, c]];
        }
        sum / bands as f32 / scene.scale
    })
}

/// Index change `index(after) - index(before)`.
pub(crate) fn index_change(
    scene: &Scene<'_>,
    index: SpectralIndex,
    mapping: &BandMapping,
) -> Result<Array2<f32>> {
    let before = index.compute(scene.pair.before(), mapping)?;
    let after = index.compute(scene.pair.after(), mapping)?;
    scene.per_pixel(|r, c| after[[r, c]] - before[[r, c]])
}

/// Edge density gain combined with intensity difference.
pub(crate) fn structures(scene: &Scene<'_>, params: EdgeDensityParams) -> Result<Array2<f32>> {
    let edges_before = scene.edges(scene.pair.before(), params)?;
    let edges_after = scene.edges(scene.pair.after(), params)?;
    let intensity = land_use(scene)?;
    scene.per_pixel(|r, c| {
        let gain = (edges_after[[r, c]] - edges_before[[r, c]]).max(0.0);
        STRUCTURE_EDGE_WEIGHT * gain + STRUCTURE_INTENSITY_WEIGHT * intensity[[r, c]]
    })
}

/// Strongest single-band difference combined with texture disruption.
pub(crate) fn disaster(scene: &Scene<'_>, params: EdgeDensityParams) -> Result<Array2<f32>> {
    let (before, after) = (scene.pair.before(), scene.pair.after());
    let bands = scene.bands();
    let edges_before = scene.edges(before, params)?;
    let edges_after = scene.edges(after, params)?;
    scene.per_pixel(|r, c| {
        let mut strongest = 0.0f32;
        for b in 0..bands {
            strongest = strongest.max((after[[b, r, c]] - before[[b, r, c]]).abs());
        }
        let texture = (edges_after[[r, c]] - edges_before[[r, c]]).abs();
        DISASTER_INTENSITY_WEIGHT * strongest / scene.scale + DISASTER_TEXTURE_WEIGHT * texture
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoshift_core::GeoTransform;

    fn pair(before: Array3<f32>, after: Array3<f32>) -> AlignedPair {
        AlignedPair::new(before, after, GeoTransform::identity(), None).unwrap()
    }

    #[test]
    fn scene_validity_needs_every_band_of_both_images() {
        let mut before = Array3::from_elem((2, 2, 2), 10.0f32);
        let mut after = Array3::from_elem((2, 2, 2), 10.0f32);
        before[[1, 1, 1]] = f32::NAN;
        after[[0, 0, 1]] = f32::INFINITY;
        let p = pair(before, after);
        let s = Scene::new(&p);
        assert!(!s.valid[[1, 1]]);
        assert!(!s.valid[[0, 1]]);
        assert!(s.valid[[0, 0]] && s.valid[[1, 0]]);
        assert_eq!(s.scale, 255.0);
    }

    #[test]
    fn constant_scene_scores_zero() {
        let p = pair(Array3::from_elem((1, 3, 3), 5.0), Array3::from_elem((1, 3, 3), 5.0));
        let score = land_use(&Scene::new(&p)).unwrap();
        assert!(score.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn land_use_is_mean_band_difference() {
        let before = Array3::zeros((2, 1, 2));
        let mut after = Array3::zeros((2, 1, 2));
        after[[0, 0, 0]] = 100.0;
        after[[1, 0, 0]] = 50.0;
        let p = pair(before, after);
        let score = land_use(&Scene::new(&p)).unwrap();
        assert_relative_eq!(score[[0, 0]], 75.0 / 255.0);
        assert_relative_eq!(score[[0, 1]], 0.0);
    }

    #[test]
    fn signed_intensity_keeps_direction() {
        let before = Array3::from_elem((1, 1, 2), 50.0);
        let mut after = Array3::from_elem((1, 1, 2), 50.0);
        after[[0, 0, 0]] = 0.0;
        after[[0, 0, 1]] = 100.0;
        let p = pair(before, after);
        let score = signed_intensity(&Scene::new(&p)).unwrap();
        assert_relative_eq!(score[[0, 0]], -50.0 / 255.0);
        assert_relative_eq!(score[[0, 1]], 50.0 / 255.0);
    }

    #[test]
    fn one_count_noise_stays_small_on_flat_scene() {
        let before = Array3::from_elem((3, 16, 16), 100.0f32);
        let after = Array3::from_shape_fn((3, 16, 16), |(_, r, c)| if (r + c) % 2 == 0 { 101.0 } else { 99.0 });
        let p = pair(before, after);
        let score = land_use(&Scene::new(&p)).unwrap();
        assert!(score.iter().all(|&v| (v - 1.0 / 255.0).abs() < 1e-6));
    }

    #[test]
    fn scale_comes_from_pair_not_scene_contents() {
        let before = Array3::from_elem((1, 1, 2), 1000.0);
        let mut after = Array3::from_elem((1, 1, 2), 1000.0);
        after[[0, 0, 0]] = 1655.35;
        let p = pair(before, after).with_value_scale(65535.0);
        let score = land_use(&Scene::new(&p)).unwrap();
        assert_relative_eq!(score[[0, 0]], 0.01, epsilon = 1e-5);
        assert_relative_eq!(score[[0, 1]], 0.0);
    }

    #[test]
    fn new_texture_raises_structure_score() {
        let before = Array3::from_elem((3, 12, 12), 100.0f32);
        let after = Array3::from_shape_fn((3, 12, 12), |(_, r, c)| {
            if (4..8).contains(&r) && (4..8).contains(&c) && (r + c) % 2 == 0 {
                250.0
            } else {
                100.0
            }
        });
        let p = pair(before, after);
        let score = structures(&Scene::new(&p), EdgeDensityParams::default()).unwrap();
        assert!(score[[5, 5]] > score[[0, 11]]);
        assert!(score.iter().all(|v| v.is_finite() && *v >= 0.0));
    }
}
