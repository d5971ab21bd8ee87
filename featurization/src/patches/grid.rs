use ndarray::{s, Array1, Array2, ArrayViewD};
use rand::rngs::StdRng;
use rand::Rng;

use super::{as_channels, check_fits, grid_starts, patch_center, PatchSampler, PatchSet};
use crate::error::Result;

/// Raw pixel patches, flattened row by row with channels innermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSampler {
    pub patch_size: usize,
    pub stride: usize,
}

impl PixelSampler {
    pub fn new(patch_size: usize, stride: usize) -> Self {
        Self { patch_size, stride }
    }
}

impl PatchSampler for PixelSampler {
    fn grid(&self, image: ArrayViewD<f64>) -> Result<PatchSet> {
        let image = as_channels(image)?;
        let (rows, cols, channels) = image.dim();
        check_fits(rows, cols, self.patch_size)?;

        let size = self.patch_size;
        let starts_y = grid_starts(rows, size, self.stride);
        let starts_x = grid_starts(cols, size, self.stride);
        let n = starts_y.len() * starts_x.len();

        let mut patches = Array2::zeros((n, size * size * channels));
        let mut centers_x = Array1::zeros(n);
        let mut centers_y = Array1::zeros(n);

        let positions = starts_y
            .iter()
            .flat_map(|&sy| starts_x.iter().map(move |&sx| (sy, sx)));

        for (idx, (sy, sx)) in positions.enumerate() {
            let window = image.slice(s![sy..sy + size, sx..sx + size, ..]);
            for (dst, src) in patches.row_mut(idx).iter_mut().zip(window.iter()) {
                *dst = *src;
            }
            centers_x[idx] = patch_center(sx, size);
            centers_y[idx] = patch_center(sy, size);
        }

        PatchSet::new(patches, centers_x, centers_y)
    }

    fn sample(&self, image: ArrayViewD<f64>, count: usize, rng: &mut StdRng) -> Result<Array2<f64>> {
        let image = as_channels(image)?;
        let (rows, cols, channels) = image.dim();
        check_fits(rows, cols, self.patch_size)?;

        let size = self.patch_size;
        let mut patches = Array2::zeros((count, size * size * channels));

        for mut row in patches.rows_mut() {
            let sy = rng.gen_range(0..=rows - size);
            let sx = rng.gen_range(0..=cols - size);
            let window = image.slice(s![sy..sy + size, sx..sx + size, ..]);
            for (dst, src) in row.iter_mut().zip(window.iter()) {
                *dst = *src;
            }
        }

        Ok(patches)
    }
}
