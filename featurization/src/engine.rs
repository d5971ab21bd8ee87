use std::path::Path;

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DescriptorConfig;
use crate::dictionary::{DictionaryModel, Encoder};
use crate::error::{FeaturizationError, Result};
use crate::patches::{center, normalize, sampler_for};
use crate::proc::load_image;
use crate::projection::RandomProjection;
use crate::pyramid::PyramidPooler;

/// Encodes images into fixed-length descriptors against a learned dictionary.
///
/// The engine is built unfitted from a [`DescriptorConfig`], trained once with
/// [`learn`](DescriptorEngine::learn) and then only read. Its full state
/// round-trips through [`save`](DescriptorEngine::save) and
/// [`load`](DescriptorEngine::load).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEngine {
    config: DescriptorConfig,
    dictionary: DictionaryModel,
    projection: Option<RandomProjection>,
}

impl DescriptorEngine {
    pub fn new(config: DescriptorConfig) -> Result<Self> {
        config.validate()?;
        let dictionary = DictionaryModel::from_config(&config);
        Ok(Self {
            config,
            dictionary,
            projection: None,
        })
    }

    pub fn config(&self) -> &DescriptorConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &DictionaryModel {
        &self.dictionary
    }

    pub fn projection(&self) -> Option<&RandomProjection> {
        self.projection.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.dictionary.is_fitted()
    }

    /// Length of every descriptor this engine produces.
    pub fn dimension(&self) -> usize {
        self.config.output_dimension()
    }

    /// Dictionary atoms as patches, `[atoms, patch_dimension]`.
    pub fn dictionary_atoms(&self) -> Result<Array2<f64>> {
        self.dictionary.patch_space_atoms()
    }

    /// Learn the dictionary from about `npatches` patches spread over `images`.
    ///
    /// Each image contributes `ceil(npatches / images)` patches. Images that
    /// cannot be decoded or sampled are skipped with a warning.
    pub fn learn<P: AsRef<Path>>(&mut self, images: &[P], npatches: usize) -> Result<()> {
        if images.is_empty() || npatches == 0 {
            return Err(FeaturizationError::NoPatches);
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let per_image = (npatches + images.len() - 1) / images.len();
        let sampler = sampler_for(&self.config);

        let mut blocks: Vec<Array2<f64>> = Vec::with_capacity(images.len());
        for (done, path) in images.iter().enumerate() {
            let path = path.as_ref();
            let sampled = load_image(path, self.config.max_image_dimension, self.config.use_color)
                .and_then(|image| sampler.sample(image.view(), per_image, &mut rng));
            match sampled {
                Ok(patches) => {
                    debug!(
                        path = %path.display(),
                        image = done + 1,
                        of = images.len(),
                        patches = patches.nrows(),
                        "sampled training image"
                    );
                    blocks.push(patches);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping training image"),
            }
        }

        let views: Vec<ArrayView2<f64>> = blocks.iter().map(|b| b.view()).collect();
        if views.iter().all(|v| v.nrows() == 0) {
            return Err(FeaturizationError::NoPatches);
        }
        let patches = concatenate(Axis(0), &views)?;
        info!(
            images = images.len(),
            used = blocks.len(),
            patches = patches.nrows(),
            "sampled training patches"
        );

        self.fit(patches.view(), &mut rng)
    }

    /// Learn directly from raw (not yet normalised) training patches.
    pub fn learn_from_patches(&mut self, patches: ArrayView2<f64>) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.fit(patches, &mut rng)
    }

    fn fit(&mut self, patches: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        if patches.nrows() == 0 {
            return Err(FeaturizationError::NoPatches);
        }
        if patches.ncols() != self.config.patch_dimension() {
            return Err(FeaturizationError::InvalidShape(format!(
                "training patches have dimension {}, expected {}",
                patches.ncols(),
                self.config.patch_dimension()
            )));
        }

        let prepared = self.prepare(patches);
        self.dictionary.fit(prepared.view(), rng)?;

        // a fresh projection for every fit, sized to this dictionary
        self.projection = self
            .config
            .compress_dim
            .map(|output| RandomProjection::generate(self.config.pooled_dimension(), output, rng));

        info!(
            atoms = self.dictionary.atoms(),
            dimension = self.dimension(),
            "dictionary learned"
        );
        Ok(())
    }

    fn prepare(&self, patches: ArrayView2<f64>) -> Array2<f64> {
        normalize(center(patches).view(), self.config.normalize_epsilon)
    }

    /// Descriptor of an image file.
    pub fn extract<P: AsRef<Path>>(&self, path: P) -> Result<Array1<f64>> {
        if !self.is_fitted() {
            return Err(FeaturizationError::NotFitted);
        }
        let image = load_image(path, self.config.max_image_dimension, self.config.use_color)?;
        self.extract_array(image.view())
    }

    /// Descriptor of an already decoded `[rows, cols]` or `[rows, cols, channels]` image.
    pub fn extract_array(&self, image: ArrayViewD<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted() {
            return Err(FeaturizationError::NotFitted);
        }

        let set = sampler_for(&self.config).grid(image.view())?;
        if set.is_empty() {
            return Err(FeaturizationError::NoPatches);
        }

        let codes = self.dictionary.encode(self.prepare(set.patches.view()).view())?;
        let shape = (image.shape()[0], image.shape()[1]);
        let pooler = PyramidPooler::new(self.config.pyramid_levels.clone(), self.config.pooling);
        let pooled = pooler.pool(codes.view(), set.centers_x.view(), set.centers_y.view(), shape)?;
        debug!(patches = set.len(), length = pooled.len(), "pooled codes");

        let descriptor = unit_length(pooled.view(), self.config.normalize_epsilon);
        match &self.projection {
            Some(projection) => {
                let compressed = projection.project(descriptor.view())?;
                Ok(unit_length(compressed.view(), self.config.normalize_epsilon))
            }
            None => Ok(descriptor),
        }
    }

    pub fn save(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        let engine: Self = bincode::deserialize(bytes)?;
        engine.config.validate()?;
        Ok(engine)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.save()?)?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::load(&bytes)
    }
}

/// `v / sqrt(sum(v^2) + epsilon)`
pub fn unit_length(v: ArrayView1<f64>, epsilon: f64) -> Array1<f64> {
    let norm = (v.dot(&v) + epsilon).sqrt();
    if norm > 0.0 {
        &v / norm
    } else {
        v.to_owned()
    }
}
