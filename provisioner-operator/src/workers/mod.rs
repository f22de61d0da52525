//! Workers
//!
//! A worker implements one job action against a repository handle. Workers
//! never touch the job record; they report through the progress recorder
//! and return a summary, and the driver owns finalization.

mod delete;
mod export;
mod migrate;
mod move_files;
mod progress;
mod sync;

use async_trait::async_trait;
use provisioner_core::domain::job::{Job, JobAction, JobSpec, JobSummary};
use provisioner_core::domain::repository::Repository;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendError;
use crate::clock::Clock;
use crate::resources::{RepositoryHandle, ResourceError};
use crate::store::{ResourceStore, StoreError};

// Re-export implementations
pub use delete::DeleteWorker;
pub use export::ExportWorker;
pub use migrate::MigrateWorker;
pub use move_files::MoveWorker;
pub use progress::{DEFAULT_MAX_ERRORS, ProgressRecorder, ProgressSnapshot};
pub use sync::{Comparator, DefaultComparator, SyncWorker};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("context canceled")]
    Canceled,

    #[error("no worker for action '{0}'")]
    UnsupportedAction(JobAction),

    #[error("{0}")]
    InvalidJob(String),

    #[error("too many errors ({0})")]
    TooManyErrors(usize),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{context}: {source}")]
    Stage {
        context: String,
        source: Box<WorkerError>,
    },
}

impl WorkerError {
    /// Prefixes the error with the stage it happened in
    pub fn context(self, context: impl Into<String>) -> Self {
        WorkerError::Stage {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            WorkerError::Canceled => true,
            WorkerError::Stage { source, .. } => source.is_canceled(),
            _ => false,
        }
    }
}

/// Per-job execution context handed to workers
#[derive(Clone)]
pub struct JobContext {
    cancel: CancellationToken,
    progress: Arc<ProgressRecorder>,
}

impl JobContext {
    pub fn new(cancel: CancellationToken, progress: Arc<ProgressRecorder>) -> Self {
        Self { cancel, progress }
    }

    pub fn progress(&self) -> &ProgressRecorder {
        &self.progress
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `Canceled` once the job has been asked to stop
    pub fn check(&self) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Canceled);
        }
        Ok(())
    }
}

/// Executes one kind of job
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
    ) -> Result<JobSummary, WorkerError>;
}

/// Maps job actions to workers
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<JobAction, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, action: JobAction, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(action, worker);
        self
    }

    pub fn get(&self, action: JobAction) -> Option<Arc<dyn Worker>> {
        self.workers.get(&action).cloned()
    }

    /// Registry with a worker for every action
    pub fn standard(
        repositories: Arc<dyn ResourceStore<Repository>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sync: Arc<dyn Worker> = Arc::new(SyncWorker::new(
            repositories,
            Arc::new(DefaultComparator),
            clock,
        ));
        let export: Arc<dyn Worker> = Arc::new(ExportWorker::new());

        Self::new()
            .register(JobAction::Pull, sync.clone())
            .register(JobAction::Push, export.clone())
            .register(
                JobAction::Migrate,
                Arc::new(MigrateWorker::new(export, sync.clone())),
            )
            .register(JobAction::Delete, Arc::new(DeleteWorker::new(sync.clone())))
            .register(JobAction::Move, Arc::new(MoveWorker::new(sync)))
    }
}

/// Removes repeated paths, keeping first occurrences in order
pub fn deduplicate_paths(paths: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .filter(|path| seen.insert(path.as_str()))
        .cloned()
        .collect()
}

/// The full pull that follows a job which changed repository files
fn follow_up_pull(job: &Job) -> Job {
    let mut pull = job.clone();
    pull.spec = JobSpec::pull(job.spec.repository.clone(), false);
    pull
}
