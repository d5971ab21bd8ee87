use std::f64::consts::PI;

use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewD, Axis};
use rand::rngs::StdRng;

use super::{as_channels, check_fits, grid_starts, patch_center, PatchSampler, PatchSet};
use crate::error::Result;
use crate::proc::luminance;

const SPATIAL_BINS: usize = 4;
const ORIENTATION_BINS: usize = 8;
/// Histogram entries are clipped to this value after the first normalisation.
const CLIP: f64 = 0.2;

pub const GRADIENT_DIMENSION: usize = SPATIAL_BINS * SPATIAL_BINS * ORIENTATION_BINS;

/// Dense gradient-orientation histograms on the same grid as [`PixelSampler`].
///
/// Every patch is split into 4x4 cells and each cell holds an 8-bin histogram
/// of gradient orientations weighted by gradient magnitude and a Gaussian
/// window centred on the patch. Colour images are reduced to luminance first.
///
/// [`PixelSampler`]: super::PixelSampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradientSampler {
    pub patch_size: usize,
    pub stride: usize,
}

struct GradientField {
    magnitude: Array2<f64>,
    orientation: Array2<f64>,
}

impl GradientSampler {
    pub fn new(patch_size: usize, stride: usize) -> Self {
        Self { patch_size, stride }
    }

    fn describe(&self, field: &GradientField, sy: usize, sx: usize) -> Array1<f64> {
        let size = self.patch_size;
        let half = size as f64 / 2.0;
        let denom = 2.0 * half * half;
        let mut histogram = Array1::zeros(GRADIENT_DIMENSION);

        for py in 0..size {
            for px in 0..size {
                let magnitude = field.magnitude[[sy + py, sx + px]];
                if magnitude == 0.0 {
                    continue;
                }
                let dy = py as f64 + 0.5 - half;
                let dx = px as f64 + 0.5 - half;
                let weight = magnitude * (-(dy * dy + dx * dx) / denom).exp();

                let theta = field.orientation[[sy + py, sx + px]];
                let bin = ((theta / (2.0 * PI)) * ORIENTATION_BINS as f64).floor() as usize % ORIENTATION_BINS;
                let cell = (py * SPATIAL_BINS / size) * SPATIAL_BINS + px * SPATIAL_BINS / size;

                histogram[cell * ORIENTATION_BINS + bin] += weight;
            }
        }

        unit_length(&mut histogram);
        histogram.mapv_inplace(|v| v.min(CLIP));
        unit_length(&mut histogram);
        histogram
    }
}

impl PatchSampler for GradientSampler {
    fn grid(&self, image: ArrayViewD<f64>) -> Result<PatchSet> {
        let image = as_channels(image)?;
        let (rows, cols, _) = image.dim();
        check_fits(rows, cols, self.patch_size)?;

        let field = compute_gradient_field(luminance(image).view());
        let size = self.patch_size;
        let starts_y = grid_starts(rows, size, self.stride);
        let starts_x = grid_starts(cols, size, self.stride);
        let n = starts_y.len() * starts_x.len();

        let mut patches = Array2::zeros((n, GRADIENT_DIMENSION));
        let mut centers_x = Array1::zeros(n);
        let mut centers_y = Array1::zeros(n);

        let positions = starts_y
            .iter()
            .flat_map(|&sy| starts_x.iter().map(move |&sx| (sy, sx)));

        for (idx, (sy, sx)) in positions.enumerate() {
            patches.row_mut(idx).assign(&self.describe(&field, sy, sx));
            centers_x[idx] = patch_center(sx, size);
            centers_y[idx] = patch_center(sy, size);
        }

        PatchSet::new(patches, centers_x, centers_y)
    }

    /// Training patches come from a dense grid whose spacing yields roughly
    /// `count` patches, randomly thinned when it yields more.
    fn sample(&self, image: ArrayViewD<f64>, count: usize, rng: &mut StdRng) -> Result<Array2<f64>> {
        if count == 0 {
            return Ok(Array2::zeros((0, GRADIENT_DIMENSION)));
        }
        let dim = |axis: usize| image.shape().get(axis).copied().unwrap_or(0);
        let (rows, cols) = (dim(0), dim(1));
        let spacing = (((rows * cols) as f64 / count as f64).sqrt().floor() as usize).max(1);

        let set = GradientSampler::new(self.patch_size, spacing).grid(image)?;
        if set.len() <= count {
            return Ok(set.patches);
        }
        let chosen = rand::seq::index::sample(rng, set.len(), count).into_vec();
        Ok(set.patches.select(Axis(0), &chosen))
    }
}

/// Central-difference gradient, zero on the one-pixel border.
fn compute_gradient_field(space: ArrayView2<f64>) -> GradientField {
    let (m, n) = space.dim();
    let mut dy = Array2::<f64>::zeros((m, n));
    let mut dx = Array2::<f64>::zeros((m, n));

    if m > 2 {
        let diff = 0.5 * (&space.slice(s![2.., ..]) - &space.slice(s![..-2, ..]));
        dy.slice_mut(s![1..-1, ..]).assign(&diff);
    }
    if n > 2 {
        let diff = 0.5 * (&space.slice(s![.., 2..]) - &space.slice(s![.., ..-2]));
        dx.slice_mut(s![.., 1..-1]).assign(&diff);
    }

    let mut magnitude = Array2::zeros((m, n));
    let mut orientation = Array2::zeros((m, n));
    ndarray::Zip::from(&mut magnitude)
        .and(&mut orientation)
        .and(&dy)
        .and(&dx)
        .for_each(|mag, theta, &gy, &gx| {
            *mag = (gy * gy + gx * gx).sqrt();
            let angle = gy.atan2(gx);
            *theta = if angle < 0.0 { angle + 2.0 * PI } else { angle };
        });

    GradientField {
        magnitude,
        orientation,
    }
}

fn unit_length(histogram: &mut Array1<f64>) {
    let norm = histogram.dot(&*histogram).sqrt();
    if norm > 0.0 {
        *histogram /= norm;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{Array, IxDyn};
    use rand::SeedableRng;

    fn dominant_bin(row: ndarray::ArrayView1<f64>) -> usize {
        let mut totals = [0.0; ORIENTATION_BINS];
        for (i, v) in row.iter().enumerate() {
            totals[i % ORIENTATION_BINS] += v;
        }
        totals
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_gradient_field_of_ramp() {
        let ramp = Array2::from_shape_fn((5, 5), |(_, x)| x as f64);
        let field = compute_gradient_field(ramp.view());

        assert_eq!(field.magnitude[[2, 2]], 1.0);
        assert_eq!(field.orientation[[2, 2]], 0.0);
        assert_eq!(field.magnitude[[2, 0]], 0.0);
    }

    #[test]
    fn test_horizontal_and_vertical_edges() {
        let sampler = GradientSampler::new(8, 4);

        let horizontal = Array::from_shape_fn(IxDyn(&[16, 16]), |idx| idx[1] as f64 / 16.0);
        let set = sampler.grid(horizontal.view()).unwrap();
        assert_eq!(set.dimension(), GRADIENT_DIMENSION);
        assert_eq!(dominant_bin(set.patches.row(0)), 0);

        let vertical = Array::from_shape_fn(IxDyn(&[16, 16]), |idx| idx[0] as f64 / 16.0);
        let set = sampler.grid(vertical.view()).unwrap();
        assert_eq!(dominant_bin(set.patches.row(0)), 2);
    }

    #[test]
    fn test_flat_image_gives_zero_histograms() {
        let flat = Array::from_elem(IxDyn(&[12, 12, 3]), 0.5);
        let set = GradientSampler::new(8, 2).grid(flat.view()).unwrap();
        assert_eq!(set.len(), 9);
        assert!(set.patches.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_histograms_are_clipped_unit_vectors() {
        let image = Array::from_shape_fn(IxDyn(&[20, 20]), |idx| ((idx[0] * 7 + idx[1] * 3) % 5) as f64);
        let set = GradientSampler::new(8, 4).grid(image.view()).unwrap();
        for row in set.patches.rows() {
            let norm = row.dot(&row).sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sample_thins_dense_grid() {
        let image = Array::from_shape_fn(IxDyn(&[32, 32]), |idx| (idx[0] + idx[1]) as f64);
        let mut rng = StdRng::seed_from_u64(3);
        // spacing floor(sqrt(1024 / 2)) = 22 gives a 2x2 grid, thinned to 2
        let patches = GradientSampler::new(8, 4).sample(image.view(), 2, &mut rng).unwrap();
        assert_eq!(patches.dim(), (2, GRADIENT_DIMENSION));
    }
}
