//! Store layer
//!
//! Stores wrap the resource API behind small trait-based interfaces so the
//! driver and controllers can be exercised against in-memory fakes. The job
//! store adds the lease protocol on top of the generic resource store.

mod api;
mod history;
mod jobs;

use async_trait::async_trait;
use provisioner_client::ClientError;
use provisioner_core::domain::Resource;
use provisioner_core::domain::job::{Job, JobOutcome, JobStatus};
use provisioner_core::domain::patch::PatchOperation;
use std::time::Duration;
use thiserror::Error;

// Re-export implementations
pub use api::ApiStore;
pub use history::HistoryWriter;
pub use jobs::PersistentJobStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no work available")]
    NoWorkAvailable,

    #[error("lease on job {0} is held by another driver")]
    LeaseLost(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflicting update to {0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<ClientError> for StoreError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(message) => StoreError::NotFound(message),
            ClientError::Conflict(message) => StoreError::Conflict(message),
            ClientError::AlreadyExists(message) => StoreError::AlreadyExists(message),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Typed access to one resource collection
#[async_trait]
pub trait ResourceStore<T: Resource>: Send + Sync {
    async fn create(&self, resource: T) -> StoreResult<T>;

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<T>;

    async fn list(&self) -> StoreResult<Vec<T>>;

    /// Conditional update; fails with `Conflict` when `resource_version` is stale
    async fn update(&self, resource: T) -> StoreResult<T>;

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()>;

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        ops: &[PatchOperation],
    ) -> StoreResult<T>;
}

/// Mutation applied to a job's status under the caller's lease
pub type StatusMutation<'a> = &'a (dyn Fn(&mut JobStatus) + Send + Sync);

/// Durable job queue with lease-based exclusive claims
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new pending job
    async fn create(&self, job: Job) -> StoreResult<Job>;

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Job>;

    /// Atomically claims the oldest claimable job for `holder`.
    ///
    /// Returns `NoWorkAvailable` when nothing can be claimed.
    async fn claim_next(&self, holder: &str, lease: Duration) -> StoreResult<Job>;

    /// Extends the lease held on `job`; `LeaseLost` if another holder took over
    async fn renew_lease(&self, job: &Job, lease: Duration) -> StoreResult<Job>;

    /// Applies a status mutation, retrying on version conflicts
    async fn update_status(&self, job: &Job, mutation: StatusMutation<'_>) -> StoreResult<Job>;

    /// Moves the job to a terminal phase. Finalizing a terminal job is a no-op.
    async fn finalize(&self, job: &Job, outcome: &JobOutcome) -> StoreResult<Job>;

    /// Claimed or running jobs whose lease expired at least `older_than` ago
    async fn list_stale(&self, older_than: Duration) -> StoreResult<Vec<Job>>;

    async fn list_terminal(&self) -> StoreResult<Vec<Job>>;

    /// Non-terminal jobs targeting one repository
    async fn list_active(&self, namespace: &str, repository: &str) -> StoreResult<Vec<Job>>;

    /// Returns a stale job to the pending queue
    async fn requeue(&self, job: &Job) -> StoreResult<Job>;

    /// Removes a job record; missing records are ignored
    async fn remove(&self, job: &Job) -> StoreResult<()>;
}
