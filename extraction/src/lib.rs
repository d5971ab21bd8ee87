//! Batch descriptor extraction over image collections.
//!
//! The [`Orchestrator`] fans a [`featurization::Descriptor`] out over a worker
//! pool, stores one `.npy` result per image, logs per-image failures and
//! skips images whose result already exists.

pub mod errlog;
pub mod error;
pub mod orchestrator;
pub mod store;
pub mod task;

pub use errlog::ErrorLog;
pub use error::{ExtractionError, Result};
pub use orchestrator::{
    BatchReport, BatchStatus, CancelToken, Orchestrator, OrchestratorConfig, Progress, ProgressSnapshot,
};
pub use store::{identity_of, NpyStore, ResultStore};
pub use task::{ExtractionResult, ExtractionTask};
