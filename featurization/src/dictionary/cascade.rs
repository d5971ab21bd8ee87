use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ica::{IcaStage, Whitener};
use super::sparse::learn_dictionary;
use super::{Encoder, FittedDictionary};
use crate::error::{FeaturizationError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeStages {
    pub ica: IcaStage,
    /// Whitens the independent components before sparse coding.
    pub whitener: Whitener,
    /// Second-stage atoms live in the whitened component space.
    pub dictionary: FittedDictionary,
}

/// Two-stage dictionary: ICA unmixing, whitening, then sparse coding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDictionary {
    pub l1_size: usize,
    pub l2_size: usize,
    pub active: usize,
    pub iterations: usize,
    stages: Option<CascadeStages>,
}

impl CascadeDictionary {
    pub fn new(l1_size: usize, l2_size: usize, active: usize, iterations: usize) -> Self {
        Self {
            l1_size,
            l2_size,
            active,
            iterations,
            stages: None,
        }
    }

    pub fn stages(&self) -> Option<&CascadeStages> {
        self.stages.as_ref()
    }

    /// Whitened first-stage responses, the space the second stage codes in.
    fn project(stages: &CascadeStages, patches: ArrayView2<f64>) -> Result<Array2<f64>> {
        if patches.ncols() != stages.ica.dimension() {
            return Err(FeaturizationError::InvalidShape(format!(
                "cascade expects {}-dimensional patches, got {}",
                stages.ica.dimension(),
                patches.ncols()
            )));
        }
        let sources = stages.ica.transform(patches);
        Ok(stages.whitener.apply(sources.view()))
    }
}

impl Encoder for CascadeDictionary {
    fn fit(&mut self, patches: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        let ica = IcaStage::fit(patches, self.l1_size, rng)?;
        let sources = ica.transform(patches);
        let whitener = Whitener::fit(sources.view(), self.l1_size)?;
        let whitened = whitener.apply(sources.view());
        debug!(components = self.l1_size, samples = patches.nrows(), "first stage fitted");

        let atoms = learn_dictionary(whitened.view(), self.l2_size, self.active, self.iterations, rng)?;
        debug!(atoms = self.l2_size, "second stage fitted");

        self.stages = Some(CascadeStages {
            ica,
            whitener,
            dictionary: FittedDictionary::new(atoms),
        });
        Ok(())
    }

    fn encode(&self, patches: ArrayView2<f64>) -> Result<Array2<f64>> {
        let stages = self.stages.as_ref().ok_or(FeaturizationError::NotFitted)?;
        let whitened = Self::project(stages, patches)?;
        stages.dictionary.encode(whitened.view(), self.active)
    }

    fn atoms(&self) -> usize {
        self.l2_size
    }

    fn is_fitted(&self) -> bool {
        self.stages.is_some()
    }

    /// Second-stage atoms pulled back through the whitener and the ICA mixing matrix.
    fn patch_space_atoms(&self) -> Result<Array2<f64>> {
        let stages = self.stages.as_ref().ok_or(FeaturizationError::NotFitted)?;
        let sources = stages.dictionary.atoms.dot(&stages.whitener.inverse.t());
        Ok(sources.dot(&stages.ica.mixing.t()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};

    use crate::patches::{center, normalize};

    fn training_patches(rng: &mut StdRng) -> Array2<f64> {
        let raw = Array2::from_shape_fn((600, 16), |(i, j)| {
            let phase = (i % 7) as f64;
            (j as f64 * 0.4 + phase).sin() + rng.gen_range(-0.3..0.3)
        });
        normalize(center(raw.view()).view(), 1e-20)
    }

    #[test]
    fn test_cascade_encode_shapes_and_sparsity() {
        let mut rng = StdRng::seed_from_u64(21);
        let patches = training_patches(&mut rng);
        let mut cascade = CascadeDictionary::new(8, 24, 3, 10);

        assert!(matches!(cascade.encode(patches.view()), Err(FeaturizationError::NotFitted)));
        cascade.fit(patches.view(), &mut rng).unwrap();
        assert!(cascade.is_fitted());

        let codes = cascade.encode(patches.view()).unwrap();
        assert_eq!(codes.dim(), (600, 24));
        for row in codes.rows() {
            assert!(row.iter().filter(|v| **v != 0.0).count() <= 3);
        }

        let stages = cascade.stages().unwrap();
        assert_eq!(stages.ica.unmixing.dim(), (8, 16));
        assert_eq!(stages.ica.mixing.dim(), (16, 8));
        assert_eq!(stages.dictionary.atoms.dim(), (24, 8));
        for row in stages.dictionary.atoms.rows() {
            assert!((row.dot(&row) - 1.0).abs() < 1e-9);
        }

        assert_eq!(cascade.patch_space_atoms().unwrap().dim(), (24, 16));
    }

    #[test]
    fn test_cascade_rejects_wrong_dimension() {
        let mut rng = StdRng::seed_from_u64(3);
        let patches = training_patches(&mut rng);
        let mut cascade = CascadeDictionary::new(4, 8, 2, 3);
        cascade.fit(patches.view(), &mut rng).unwrap();

        let wrong = Array2::<f64>::zeros((2, 9));
        assert!(matches!(cascade.encode(wrong.view()), Err(FeaturizationError::InvalidShape(_))));
    }

    #[test]
    fn test_encoding_is_a_pure_function() {
        let mut rng = StdRng::seed_from_u64(8);
        let patches = training_patches(&mut rng);
        let mut cascade = CascadeDictionary::new(6, 12, 2, 5);
        cascade.fit(patches.view(), &mut rng).unwrap();

        let first = cascade.encode(patches.view()).unwrap();
        let second = cascade.encode(patches.view()).unwrap();
        assert_eq!(first, second);
    }
}
