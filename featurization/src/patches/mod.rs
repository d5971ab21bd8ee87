//! Patch extraction and per-patch normalisation.
//!
//! A [`PatchSampler`] turns a decoded image into a [`PatchSet`]: one row per
//! patch plus the patch centre coordinates. Centres follow the half-pixel
//! convention `start + patch_size / 2 - 0.5`, so a 3x3 patch starting at the
//! image origin is centred on pixel `(1, 1)`.

pub mod gradient;
pub mod grid;

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix3};
use rand::rngs::StdRng;

use crate::config::{DescriptorConfig, SamplerKind};
use crate::error::{FeaturizationError, Result};

pub use gradient::GradientSampler;
pub use grid::PixelSampler;

/// Patches of one image, row-aligned with their centre coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSet {
    pub patches: Array2<f64>,
    /// Column coordinate of each patch centre.
    pub centers_x: Array1<f64>,
    /// Row coordinate of each patch centre.
    pub centers_y: Array1<f64>,
}

impl PatchSet {
    pub fn new(patches: Array2<f64>, centers_x: Array1<f64>, centers_y: Array1<f64>) -> Result<Self> {
        let n = patches.nrows();
        if centers_x.len() != n || centers_y.len() != n {
            return Err(FeaturizationError::InvalidShape(format!(
                "{} patches but {} x-centres and {} y-centres",
                n,
                centers_x.len(),
                centers_y.len()
            )));
        }
        Ok(Self {
            patches,
            centers_x,
            centers_y,
        })
    }

    pub fn len(&self) -> usize {
        self.patches.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.patches.ncols()
    }
}

/// Source of fixed-length patch vectors for both training and encoding.
///
/// Implementations must produce the same dimensionality from [`grid`] and
/// [`sample`] so that a dictionary learned from sampled patches can encode
/// grid patches.
///
/// [`grid`]: PatchSampler::grid
/// [`sample`]: PatchSampler::sample
pub trait PatchSampler: Send + Sync {
    /// Patches on the regular grid covering the whole image.
    fn grid(&self, image: ArrayViewD<f64>) -> Result<PatchSet>;

    /// `count` training patches drawn from the image.
    fn sample(&self, image: ArrayViewD<f64>, count: usize, rng: &mut StdRng) -> Result<Array2<f64>>;
}

pub fn sampler_for(config: &DescriptorConfig) -> Box<dyn PatchSampler> {
    match config.sampler {
        SamplerKind::Pixel => Box::new(PixelSampler::new(config.patch_size, config.patch_stride)),
        SamplerKind::Gradient => Box::new(GradientSampler::new(config.patch_size, config.patch_stride)),
    }
}

/// View a 2-D or 3-D image as `[rows, cols, channels]`.
pub(crate) fn as_channels(image: ArrayViewD<f64>) -> Result<ArrayView3<f64>> {
    let image = match image.ndim() {
        2 => image.insert_axis(Axis(2)),
        3 => image,
        n => {
            return Err(FeaturizationError::InvalidShape(format!(
                "image must have 2 or 3 dimensions, got {}",
                n
            )))
        }
    };
    Ok(image.into_dimensionality::<Ix3>()?)
}

pub(crate) fn check_fits(rows: usize, cols: usize, patch_size: usize) -> Result<()> {
    if patch_size == 0 || patch_size > rows || patch_size > cols {
        return Err(FeaturizationError::InvalidShape(format!(
            "patch size {} does not fit a {}x{} image",
            patch_size, rows, cols
        )));
    }
    Ok(())
}

/// Grid start positions along one axis, centred over the remainder.
pub(crate) fn grid_starts(extent: usize, patch_size: usize, stride: usize) -> Vec<usize> {
    if patch_size > extent || stride == 0 {
        return Vec::new();
    }
    let offset = ((extent - patch_size) % stride) / 2;
    (offset..=extent - patch_size).step_by(stride).collect()
}

pub(crate) fn patch_center(start: usize, patch_size: usize) -> f64 {
    start as f64 + patch_size as f64 / 2.0 - 0.5
}

/// Remove each row's own mean.
pub fn center(patches: ArrayView2<f64>) -> Array2<f64> {
    let mut centred = patches.to_owned();
    for mut row in centred.rows_mut() {
        let mean = row.mean().unwrap_or(0.0);
        row -= mean;
    }
    centred
}

/// Scale each row by `1 / sqrt(sum(row^2) + epsilon)`.
pub fn normalize(patches: ArrayView2<f64>, epsilon: f64) -> Array2<f64> {
    let mut scaled = patches.to_owned();
    for mut row in scaled.rows_mut() {
        let norm = (row.dot(&row) + epsilon).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }
    scaled
}
