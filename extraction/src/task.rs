use std::path::{Path, PathBuf};

use featurization::Descriptor;
use ndarray::Array1;

use crate::error::ExtractionError;
use crate::store::{identity_of, ResultStore};

/// One image to describe and the slot its descriptor goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTask {
    pub image: PathBuf,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    Success { identity: String, descriptor: Array1<f64> },
    /// A result was already stored for this identity.
    Skipped { identity: String },
    Failed { identity: String, detail: String },
}

impl ExtractionResult {
    pub fn identity(&self) -> &str {
        match self {
            ExtractionResult::Success { identity, .. }
            | ExtractionResult::Skipped { identity }
            | ExtractionResult::Failed { identity, .. } => identity,
        }
    }
}

impl ExtractionTask {
    pub fn new<P: AsRef<Path>>(image: P) -> Self {
        let image = image.as_ref().to_path_buf();
        let identity = identity_of(&image);
        Self { image, identity }
    }

    /// Skip check, extraction and persistence. Never returns an error: every
    /// failure becomes [`ExtractionResult::Failed`].
    pub fn run<D, S>(&self, descriptor: &D, store: &S) -> ExtractionResult
    where
        D: Descriptor + ?Sized,
        S: ResultStore + ?Sized,
    {
        if store.has(&self.identity) {
            return ExtractionResult::Skipped {
                identity: self.identity.clone(),
            };
        }

        let outcome = descriptor
            .extract(&self.image)
            .map_err(ExtractionError::from)
            .and_then(|d| store.put(&self.identity, &d).map(|_| d));

        match outcome {
            Ok(descriptor) => ExtractionResult::Success {
                identity: self.identity.clone(),
                descriptor,
            },
            Err(err) => ExtractionResult::Failed {
                identity: self.identity.clone(),
                detail: err.to_string(),
            },
        }
    }
}
