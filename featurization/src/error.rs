use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeaturizationError {
    /// Encoding was attempted before a dictionary was learned.
    #[error("dictionary has not been fitted")]
    NotFitted,

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// The sampler produced no patches for the given input.
    #[error("no patches could be extracted")]
    NoPatches,

    #[error("linear algebra failure: {0}")]
    Linalg(String),
}

impl From<bincode::Error> for FeaturizationError {
    fn from(err: bincode::Error) -> Self {
        FeaturizationError::Persistence(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FeaturizationError {
    fn from(err: ndarray::ShapeError) -> Self {
        FeaturizationError::InvalidShape(err.to_string())
    }
}

impl From<serde_json::Error> for FeaturizationError {
    fn from(err: serde_json::Error) -> Self {
        FeaturizationError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeaturizationError>;
