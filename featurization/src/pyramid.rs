use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1};
use serde::{Deserialize, Serialize};

use crate::error::{FeaturizationError, Result};

/// Reduction applied to the codes that fall in one pyramid bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    /// Per-dimension maximum of absolute values.
    #[default]
    MaxAbs,
    /// Per-dimension mean.
    Mean,
}

impl Pooling {
    fn reduce(&self, codes: ArrayView2<f64>, members: &[usize], out: &mut ArrayViewMut1<f64>) {
        match self {
            Pooling::MaxAbs => {
                for &idx in members {
                    out.zip_mut_with(&codes.row(idx), |acc, &v| *acc = acc.max(v.abs()));
                }
            }
            Pooling::Mean => {
                for &idx in members {
                    *out += &codes.row(idx);
                }
                *out /= members.len() as f64;
            }
        }
    }
}

/// Spatial pyramid over the image extent.
///
/// Level `L` splits the image into an `L x L` grid. Output rows are ordered by
/// level as given, then row-major within a level; bins nobody falls into stay zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidPooler {
    pub levels: Vec<usize>,
    pub pooling: Pooling,
}

impl PyramidPooler {
    pub fn new(levels: Vec<usize>, pooling: Pooling) -> Self {
        Self { levels, pooling }
    }

    pub fn bins(&self) -> usize {
        self.levels.iter().map(|l| l * l).sum()
    }

    /// Pooled codes as a `[bins, code_dim]` matrix.
    pub fn pool_bins(
        &self,
        codes: ArrayView2<f64>,
        centers_x: ArrayView1<f64>,
        centers_y: ArrayView1<f64>,
        image_shape: (usize, usize),
    ) -> Result<Array2<f64>> {
        let n = codes.nrows();
        if centers_x.len() != n || centers_y.len() != n {
            return Err(FeaturizationError::InvalidShape(format!(
                "{} codes but {} x-centres and {} y-centres",
                n,
                centers_x.len(),
                centers_y.len()
            )));
        }
        if self.levels.contains(&0) {
            return Err(FeaturizationError::InvalidShape("pyramid level 0".into()));
        }

        let (rows, cols) = image_shape;
        let mut pooled = Array2::zeros((self.bins(), codes.ncols()));
        let mut offset = 0;

        for &level in &self.levels {
            let mut members: Vec<Vec<usize>> = vec![Vec::new(); level * level];
            for (idx, (&cx, &cy)) in centers_x.iter().zip(centers_y.iter()).enumerate() {
                members[bin_index(cx, cy, level, rows, cols)].push(idx);
            }

            for (bin, patch_ids) in members.iter().enumerate() {
                if patch_ids.is_empty() {
                    continue;
                }
                let mut out = pooled.row_mut(offset + bin);
                self.pooling.reduce(codes, patch_ids, &mut out);
            }
            offset += level * level;
        }

        Ok(pooled)
    }

    /// Pooled codes flattened bin by bin into one vector.
    pub fn pool(
        &self,
        codes: ArrayView2<f64>,
        centers_x: ArrayView1<f64>,
        centers_y: ArrayView1<f64>,
        image_shape: (usize, usize),
    ) -> Result<Array1<f64>> {
        let pooled = self.pool_bins(codes, centers_x, centers_y, image_shape)?;
        let len = pooled.len();
        Ok(pooled.into_shape(len)?)
    }
}

/// Row-major bin of a patch centre within an `level x level` grid.
///
/// Centres on or beyond the far edge are clamped into the last bin so that
/// every patch lands in exactly one bin.
pub fn bin_index(cx: f64, cy: f64, level: usize, rows: usize, cols: usize) -> usize {
    let bin_width = cols as f64 / level as f64;
    let bin_height = rows as f64 / level as f64;
    let clamp = |v: f64| (v.floor().max(0.0) as usize).min(level - 1);
    clamp(cy / bin_height) * level + clamp(cx / bin_width)
}

/// Number of patches per bin, in output row order.
pub fn bin_counts(
    centers_x: ArrayView1<f64>,
    centers_y: ArrayView1<f64>,
    image_shape: (usize, usize),
    levels: &[usize],
) -> Vec<usize> {
    let (rows, cols) = image_shape;
    let mut counts = Vec::new();
    for &level in levels {
        let mut level_counts = vec![0; level * level];
        for (&cx, &cy) in centers_x.iter().zip(centers_y.iter()) {
            level_counts[bin_index(cx, cy, level, rows, cols)] += 1;
        }
        counts.extend(level_counts);
    }
    counts
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{array, Array, Axis};

    use crate::patches::{PatchSampler, PixelSampler};

    fn counting_patches() -> crate::patches::PatchSet {
        let image = Array::range(1.0, 17.0, 1.0)
            .into_shape(ndarray::IxDyn(&[4, 4]))
            .unwrap();
        PixelSampler::new(3, 1).grid(image.view()).unwrap()
    }

    #[test]
    fn test_pyramid_pooling_order() {
        let set = counting_patches();
        let pooler = PyramidPooler::new(vec![1, 2], Pooling::MaxAbs);
        let pooled = pooler
            .pool_bins(set.patches.view(), set.centers_x.view(), set.centers_y.view(), (4, 4))
            .unwrap();

        let p = &set.patches;
        let expected = ndarray::stack![Axis(0), p.row(3), p.row(0), p.row(1), p.row(2), p.row(3)];
        assert_eq!(pooled, expected);

        let flat = pooler
            .pool(set.patches.view(), set.centers_x.view(), set.centers_y.view(), (4, 4))
            .unwrap();
        assert_eq!(flat.len(), 5 * 9);
        assert_eq!(flat.slice(ndarray::s![9..18]).to_vec(), p.row(0).to_vec());
    }

    #[test]
    fn test_max_abs_uses_magnitude() {
        let codes = array![[-5.0, 1.0], [2.0, -3.0]];
        let cx = array![0.5, 1.5];
        let cy = array![0.5, 0.5];
        let pooled = PyramidPooler::new(vec![1], Pooling::MaxAbs)
            .pool_bins(codes.view(), cx.view(), cy.view(), (2, 2))
            .unwrap();
        assert_eq!(pooled, array![[5.0, 3.0]]);
    }

    #[test]
    fn test_mean_pooling_and_empty_bins() {
        let codes = array![[1.0, 2.0], [3.0, -2.0]];
        let cx = array![0.5, 0.5];
        let cy = array![0.5, 1.0];
        let pooled = PyramidPooler::new(vec![1, 2], Pooling::Mean)
            .pool_bins(codes.view(), cx.view(), cy.view(), (4, 4))
            .unwrap();

        assert_eq!(
            pooled,
            array![[2.0, 0.0], [2.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]
        );
    }

    #[test]
    fn test_every_patch_in_exactly_one_bin() {
        let image = Array::<f64, _>::zeros(ndarray::IxDyn(&[37, 53]));
        let set = PixelSampler::new(5, 3).grid(image.view()).unwrap();
        let levels = [1, 2, 3, 4, 7];
        let counts = bin_counts(set.centers_x.view(), set.centers_y.view(), (37, 53), &levels);

        let mut offset = 0;
        for level in levels {
            let total: usize = counts[offset..offset + level * level].iter().sum();
            assert_eq!(total, set.len());
            offset += level * level;
        }
        assert_eq!(offset, counts.len());
    }

    #[test]
    fn test_far_edge_centre_is_clamped() {
        assert_eq!(bin_index(4.0, 4.0, 2, 4, 4), 3);
        assert_eq!(bin_index(-0.5, 0.0, 2, 4, 4), 0);
    }

    #[test]
    fn test_rejects_misaligned_centres() {
        let codes = Array2::<f64>::zeros((3, 2));
        let cx = array![0.0, 1.0];
        let result = PyramidPooler::new(vec![1], Pooling::Mean).pool_bins(codes.view(), cx.view(), cx.view(), (4, 4));
        assert!(matches!(result, Err(FeaturizationError::InvalidShape(_))));
    }
}
