use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use featurization::Descriptor;
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::errlog::ErrorLog;
use crate::error::Result;
use crate::store::{NpyStore, ResultStore};
use crate::task::{ExtractionResult, ExtractionTask};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// `None` uses the available hardware parallelism.
    pub worker_count: Option<usize>,
    pub output_dir: PathBuf,
    pub error_log: PathBuf,
}

impl OrchestratorConfig {
    /// Results in `output_dir`, errors in `output_dir/errors.log`.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        let output_dir = output_dir.as_ref().to_path_buf();
        Self {
            worker_count: None,
            error_log: output_dir.join("errors.log"),
            output_dir,
        }
    }

    pub fn workers(&self) -> usize {
        self.worker_count
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }
}

/// Stops dispatch of further tasks; tasks already running finish normally.
///
/// A token belongs to one batch. Hand a fresh one to the next run to resume.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Number of progress lines logged over one batch.
const PROGRESS_REPORTS: usize = 20;

/// Live counters of a running batch.
#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicUsize,
    skipped: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ProgressSnapshot {
    pub fn completed(&self) -> usize {
        self.skipped + self.succeeded + self.failed
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed())
    }
}

impl Progress {
    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.finished.store(0, Ordering::SeqCst);
    }

    /// Counts one finished task and returns how many have finished so far.
    fn tick(&self) -> usize {
        self.finished.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    /// Some images failed; details are in the error log.
    CompletedWithErrors,
    /// Every image that was attempted failed.
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks never dispatched because of cancellation.
    pub cancelled: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn status(&self) -> BatchStatus {
        if self.cancelled > 0 {
            BatchStatus::Cancelled
        } else if self.failed == 0 {
            BatchStatus::Completed
        } else if self.succeeded == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::CompletedWithErrors
        }
    }
}

/// Runs a descriptor over many images on a fixed worker pool.
///
/// Per-image failures are written to the error log and counted; they never
/// stop the batch. Images that already have a stored result are skipped, so
/// rerunning an interrupted batch only computes what is missing.
pub struct Orchestrator<S: ResultStore> {
    store: S,
    errors: ErrorLog,
    pool: ThreadPool,
    progress: Arc<Progress>,
}

impl Orchestrator<NpyStore> {
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let store = NpyStore::create(&config.output_dir)?;
        let errors = ErrorLog::open(&config.error_log)?;
        Self::new(store, errors, config.workers())
    }
}

impl<S: ResultStore> Orchestrator<S> {
    pub fn new(store: S, errors: ErrorLog, workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("extract-{}", i))
            .build()?;
        Ok(Self {
            store,
            errors,
            pool,
            progress: Arc::new(Progress::default()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn error_log(&self) -> &Path {
        self.errors.path()
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Describe every image in `images`.
    ///
    /// Fails up front only when the descriptor cannot work at all (e.g. an
    /// unfitted model); everything that goes wrong for a single image is
    /// reported through the returned [`BatchReport`] and the error log.
    pub fn run<D: Descriptor + ?Sized>(&self, descriptor: &D, images: &[PathBuf]) -> Result<BatchReport> {
        self.run_until(descriptor, images, &CancelToken::default())
    }

    /// Like [`run`](Self::run), but stops dispatching once `cancel` fires.
    pub fn run_until<D: Descriptor + ?Sized>(
        &self,
        descriptor: &D,
        images: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        descriptor.ensure_ready()?;

        let start = Instant::now();
        let tasks: Vec<ExtractionTask> = images.iter().map(ExtractionTask::new).collect();
        self.progress.reset(tasks.len());
        info!(images = tasks.len(), workers = self.workers(), "starting extraction");

        let every = (tasks.len() / PROGRESS_REPORTS).max(1);
        self.pool.install(|| {
            tasks
                .par_iter()
                .for_each(|task| self.dispatch(descriptor, task, cancel, every))
        });

        let done = self.progress.snapshot();
        let report = BatchReport {
            total: done.total,
            skipped: done.skipped,
            succeeded: done.succeeded,
            failed: done.failed,
            cancelled: done.remaining(),
            elapsed: start.elapsed(),
        };

        match report.status() {
            BatchStatus::Completed => info!(
                succeeded = report.succeeded,
                skipped = report.skipped,
                elapsed = ?report.elapsed,
                "extraction complete"
            ),
            BatchStatus::CompletedWithErrors | BatchStatus::Failed => warn!(
                succeeded = report.succeeded,
                skipped = report.skipped,
                failed = report.failed,
                log = %self.errors.path().display(),
                "extraction finished with errors, see the error log"
            ),
            BatchStatus::Cancelled => warn!(
                cancelled = report.cancelled,
                completed = done.completed(),
                "extraction cancelled"
            ),
        }
        Ok(report)
    }

    fn dispatch<D: Descriptor + ?Sized>(
        &self,
        descriptor: &D,
        task: &ExtractionTask,
        cancel: &CancelToken,
        every: usize,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(descriptor, &self.store)))
            .unwrap_or_else(|_| ExtractionResult::Failed {
                identity: task.identity.clone(),
                detail: "extraction panicked".into(),
            });

        match result {
            ExtractionResult::Success { identity, .. } => {
                debug!(%identity, "extracted");
                self.progress.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            ExtractionResult::Skipped { identity } => {
                debug!(%identity, "already extracted, skipping");
                self.progress.skipped.fetch_add(1, Ordering::SeqCst);
            }
            ExtractionResult::Failed { identity, detail } => {
                warn!(%identity, error = %detail, "extraction failed");
                if let Err(err) = self.errors.record(&identity, &detail) {
                    error!(%identity, error = %err, "could not write to the error log");
                }
                self.progress.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let finished = self.progress.tick();
        if finished % every == 0 {
            let snapshot = self.progress.snapshot();
            info!(
                completed = snapshot.completed(),
                remaining = snapshot.remaining(),
                failed = snapshot.failed,
                "extraction progress"
            );
        }
    }
}
