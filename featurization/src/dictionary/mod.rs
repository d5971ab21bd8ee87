//! Learned dictionaries that turn normalised patches into sparse codes.
//!
//! Two families share the [`Encoder`] contract: a [`CascadeDictionary`]
//! (independent components, whitening, then a sparse-coding dictionary) and a
//! [`ClusterDictionary`] (k-means centres used as atoms). Both encode with
//! orthogonal matching pursuit and hold no mutable state once fitted, so a
//! fitted model can be shared by any number of concurrent readers.

pub mod cascade;
pub mod ica;
pub mod kmeans;
pub mod omp;
pub mod sparse;

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::{DescriptorConfig, EncoderConfig};
use crate::error::{FeaturizationError, Result};

pub use cascade::CascadeDictionary;
pub use kmeans::ClusterDictionary;

pub trait Encoder {
    /// Learn the dictionary from training patches, replacing any earlier fit.
    fn fit(&mut self, patches: ArrayView2<f64>, rng: &mut StdRng) -> Result<()>;

    /// Sparse codes, one `[atoms]` row per input patch.
    fn encode(&self, patches: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Length of a code.
    fn atoms(&self) -> usize;

    fn is_fitted(&self) -> bool;

    /// Dictionary atoms expressed as patches, `[atoms, patch_dimension]`.
    fn patch_space_atoms(&self) -> Result<Array2<f64>>;
}

/// Unit-norm atoms and their Gram matrix, frozen after fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedDictionary {
    /// `[atoms, dimension]`
    pub atoms: Array2<f64>,
    pub gram: Array2<f64>,
}

impl FittedDictionary {
    pub fn new(atoms: Array2<f64>) -> Self {
        let gram = omp::gram(atoms.view());
        Self { atoms, gram }
    }

    pub fn dimension(&self) -> usize {
        self.atoms.ncols()
    }

    pub fn encode(&self, x: ArrayView2<f64>, active: usize) -> Result<Array2<f64>> {
        if x.ncols() != self.dimension() {
            return Err(FeaturizationError::InvalidShape(format!(
                "dictionary expects {}-dimensional input, got {}",
                self.dimension(),
                x.ncols()
            )));
        }
        omp::encode(x, self.atoms.view(), self.gram.view(), active)
    }
}

/// The dictionary owned by a descriptor engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DictionaryModel {
    Cascade(CascadeDictionary),
    Cluster(ClusterDictionary),
}

impl DictionaryModel {
    /// An unfitted dictionary of the configured family.
    pub fn from_config(config: &DescriptorConfig) -> Self {
        match config.encoder {
            EncoderConfig::Cascade {
                l1_dictionary_size,
                l2_dictionary_size,
            } => DictionaryModel::Cascade(CascadeDictionary::new(
                l1_dictionary_size,
                l2_dictionary_size,
                config.active_count,
                config.training_iterations,
            )),
            EncoderConfig::Cluster {
                dictionary_size,
                restarts,
            } => DictionaryModel::Cluster(ClusterDictionary::new(
                dictionary_size,
                restarts,
                config.active_count,
                config.training_iterations,
            )),
        }
    }

    fn inner(&self) -> &dyn Encoder {
        match self {
            DictionaryModel::Cascade(d) => d,
            DictionaryModel::Cluster(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Encoder {
        match self {
            DictionaryModel::Cascade(d) => d,
            DictionaryModel::Cluster(d) => d,
        }
    }
}

impl Encoder for DictionaryModel {
    fn fit(&mut self, patches: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        self.inner_mut().fit(patches, rng)
    }

    fn encode(&self, patches: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.inner().encode(patches)
    }

    fn atoms(&self) -> usize {
        self.inner().atoms()
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }

    fn patch_space_atoms(&self) -> Result<Array2<f64>> {
        self.inner().patch_space_atoms()
    }
}
