use std::path::{Path, PathBuf};

use ndarray::{Array1, Axis};

use crate::engine::DescriptorEngine;
use crate::error::{FeaturizationError, Result};
use crate::proc::load_image;

/// Anything that maps an image file to a descriptor vector.
///
/// Implementations are shared read-only between extraction workers.
pub trait Descriptor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Array1<f64>>;

    /// Train on a corpus. Descriptors without learned state accept and ignore it.
    fn learn(&mut self, _images: &[PathBuf], _npatches: usize) -> Result<()> {
        Ok(())
    }

    /// Fails when `extract` could not succeed for any input, e.g. an unfitted model.
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }
}

impl Descriptor for DescriptorEngine {
    fn extract(&self, path: &Path) -> Result<Array1<f64>> {
        DescriptorEngine::extract(self, path)
    }

    fn learn(&mut self, images: &[PathBuf], npatches: usize) -> Result<()> {
        DescriptorEngine::learn(self, images, npatches)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_fitted() {
            Ok(())
        } else {
            Err(FeaturizationError::NotFitted)
        }
    }
}

/// Per-channel mean colour of the image, for smoke runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeanColour {
    pub max_image_dimension: u32,
}

impl Default for MeanColour {
    fn default() -> Self {
        Self {
            max_image_dimension: 320,
        }
    }
}

impl Descriptor for MeanColour {
    fn extract(&self, path: &Path) -> Result<Array1<f64>> {
        let image = load_image(path, self.max_image_dimension, true)?;
        let (rows, cols) = (image.shape()[0], image.shape()[1]);
        let pixels = image.into_shape((rows * cols, 3))?;
        pixels
            .mean_axis(Axis(0))
            .ok_or_else(|| FeaturizationError::InvalidShape("image has no pixels".into()))
    }
}
