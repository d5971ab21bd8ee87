use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FeaturizationError, Result};
use crate::patches::gradient::GRADIENT_DIMENSION;
use crate::pyramid::Pooling;

/// Which dictionary family encodes the patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderConfig {
    /// ICA unmixing, whitening, then a sparse-coding dictionary on top.
    Cascade {
        l1_dictionary_size: usize,
        l2_dictionary_size: usize,
    },
    /// K-means centres used as a dictionary for orthogonal matching pursuit.
    Cluster {
        dictionary_size: usize,
        restarts: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    /// Raw pixel patches on a dense grid.
    Pixel,
    /// Dense gradient-orientation histograms (SIFT-like, 128 dimensions).
    Gradient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Longest image side after resizing, in pixels.
    pub max_image_dimension: u32,
    pub patch_size: usize,
    pub patch_stride: usize,
    /// Sparse budget `k`: the number of non-zero entries allowed per code.
    pub active_count: usize,
    pub pyramid_levels: Vec<usize>,
    pub encoder: EncoderConfig,
    pub sampler: SamplerKind,
    pub pooling: Pooling,
    pub use_color: bool,
    pub compress_dim: Option<usize>,
    pub training_iterations: usize,
    pub normalize_epsilon: f64,
    pub seed: u64,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            max_image_dimension: 320,
            patch_size: 16,
            patch_stride: 8,
            active_count: 10,
            pyramid_levels: vec![1, 2, 4],
            encoder: EncoderConfig::Cluster {
                dictionary_size: 512,
                restarts: 3,
            },
            sampler: SamplerKind::Pixel,
            pooling: Pooling::MaxAbs,
            use_color: false,
            compress_dim: None,
            training_iterations: 300,
            normalize_epsilon: 1e-20,
            seed: 0,
        }
    }
}

impl DescriptorConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn channels(&self) -> usize {
        match (self.sampler, self.use_color) {
            (SamplerKind::Pixel, true) => 3,
            _ => 1,
        }
    }

    /// Length of one patch vector as produced by the configured sampler.
    pub fn patch_dimension(&self) -> usize {
        match self.sampler {
            SamplerKind::Pixel => self.patch_size * self.patch_size * self.channels(),
            SamplerKind::Gradient => GRADIENT_DIMENSION,
        }
    }

    /// Number of atoms in the dictionary whose codes are pooled.
    pub fn atoms(&self) -> usize {
        match self.encoder {
            EncoderConfig::Cascade {
                l2_dictionary_size, ..
            } => l2_dictionary_size,
            EncoderConfig::Cluster {
                dictionary_size, ..
            } => dictionary_size,
        }
    }

    pub fn pyramid_bins(&self) -> usize {
        self.pyramid_levels.iter().map(|l| l * l).sum()
    }

    /// Descriptor length before compression.
    pub fn pooled_dimension(&self) -> usize {
        self.atoms() * self.pyramid_bins()
    }

    /// Final descriptor length.
    pub fn output_dimension(&self) -> usize {
        self.compress_dim.unwrap_or_else(|| self.pooled_dimension())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(FeaturizationError::InvalidConfig(msg));

        if self.patch_size == 0 || self.patch_stride == 0 {
            return invalid("patch size and stride must be positive".into());
        }
        if self.max_image_dimension < self.patch_size as u32 {
            return invalid(format!(
                "max image dimension {} is smaller than the patch size {}",
                self.max_image_dimension, self.patch_size
            ));
        }
        if self.pyramid_levels.is_empty() || self.pyramid_levels.contains(&0) {
            return invalid(format!(
                "pyramid levels must be non-empty and positive, got {:?}",
                self.pyramid_levels
            ));
        }
        match self.encoder {
            EncoderConfig::Cascade {
                l1_dictionary_size,
                l2_dictionary_size,
            } => {
                if l1_dictionary_size == 0 || l2_dictionary_size == 0 {
                    return invalid("dictionary sizes must be positive".into());
                }
                if l1_dictionary_size > self.patch_dimension() {
                    return invalid(format!(
                        "l1 dictionary size {} exceeds the patch dimension {}",
                        l1_dictionary_size,
                        self.patch_dimension()
                    ));
                }
            }
            EncoderConfig::Cluster {
                dictionary_size,
                restarts,
            } => {
                if dictionary_size == 0 || restarts == 0 {
                    return invalid("dictionary size and restarts must be positive".into());
                }
            }
        }
        if self.active_count == 0 || self.active_count > self.atoms() {
            return invalid(format!(
                "active count {} must lie in 1..={}",
                self.active_count,
                self.atoms()
            ));
        }
        if self.compress_dim == Some(0) {
            return invalid("compress_dim must be positive when set".into());
        }
        if self.training_iterations == 0 {
            return invalid("training_iterations must be positive".into());
        }
        if !(self.normalize_epsilon >= 0.0) {
            return invalid("normalize_epsilon must be non-negative".into());
        }
        Ok(())
    }
}
