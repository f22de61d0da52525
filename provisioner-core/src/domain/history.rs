//! HistoricJob domain type
//!
//! Immutable audit snapshot of a terminal job, written once by the history
//! writer and deleted by the history cleanup controller after expiration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobSpec, JobStatus};
use super::meta::{ObjectMeta, Resource};

pub const JOB_NAME_LABEL: &str = "provisioning.dev/job";
pub const REPOSITORY_LABEL: &str = "provisioning.dev/repository";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricJob {
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
    pub status: JobStatus,
}

impl HistoricJob {
    /// Snapshots a job. The name is derived from the job name and uid so that
    /// archiving the same job twice targets the same record.
    pub fn from_job(job: &Job) -> Self {
        let mut metadata = ObjectMeta::new(
            job.metadata.namespace.clone(),
            format!("{}-{}", job.metadata.name, record_suffix(&job.metadata)),
        );
        metadata
            .labels
            .insert(JOB_NAME_LABEL.to_string(), job.metadata.name.clone());
        metadata
            .labels
            .insert(REPOSITORY_LABEL.to_string(), job.spec.repository.clone());

        let mut status = job.status.clone();
        status.lease = None;

        Self {
            metadata,
            spec: job.spec.clone(),
            status,
        }
    }

    /// Age relative to the creation timestamp; unknown creation counts as new
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        self.metadata
            .creation_timestamp
            .map(|created| now - created)
            .unwrap_or_else(Duration::zero)
    }
}

/// Uid prefix; jobs without a uid fall back to their creation time in
/// milliseconds, and to a random suffix when that is unknown too
fn record_suffix(meta: &ObjectMeta) -> String {
    if !meta.uid.is_nil() {
        return meta.uid.simple().to_string()[..8].to_string();
    }
    match meta.creation_timestamp {
        Some(created) => created.timestamp_millis().to_string(),
        None => Uuid::new_v4().simple().to_string()[..8].to_string(),
    }
}

impl Resource for HistoricJob {
    const KIND: &'static str = "HistoricJob";
    const PLURAL: &'static str = "historicjobs";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
