//! Image descriptors from learned patch dictionaries.
//!
//! Images are cut into dense patches, each patch is encoded as a sparse
//! combination of dictionary atoms, and the codes are max- or mean-pooled
//! over a spatial pyramid into one fixed-length vector per image.

pub mod config;
pub mod descriptor;
pub mod dictionary;
pub mod engine;
pub mod error;
mod linalg;
pub mod patches;
pub mod proc;
pub mod projection;
pub mod pyramid;

pub use config::{DescriptorConfig, EncoderConfig, SamplerKind};
pub use descriptor::{Descriptor, MeanColour};
pub use dictionary::{DictionaryModel, Encoder};
pub use engine::DescriptorEngine;
pub use error::{FeaturizationError, Result};
pub use pyramid::{Pooling, PyramidPooler};
