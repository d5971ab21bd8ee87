use featurization::FeaturizationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error(transparent)]
    Featurization(#[from] FeaturizationError),

    /// Reading or writing a stored descriptor failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<ndarray_npy::WriteNpyError> for ExtractionError {
    fn from(err: ndarray_npy::WriteNpyError) -> Self {
        ExtractionError::Persistence(err.to_string())
    }
}

impl From<ndarray_npy::ReadNpyError> for ExtractionError {
    fn from(err: ndarray_npy::ReadNpyError) -> Self {
        ExtractionError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
