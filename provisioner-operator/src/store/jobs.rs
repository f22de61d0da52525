//! Lease-based job store
//!
//! All mutations are conditional updates against the job's resource
//! version. A claim succeeds for exactly one contender; everybody else sees
//! a conflict and moves on to the next candidate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisioner_core::domain::Resource;
use provisioner_core::domain::job::{Job, JobOutcome, JobPhase, Lease};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{JobStore, ResourceStore, StatusMutation, StoreError, StoreResult};
use crate::clock::{Clock, to_chrono};

/// Attempts made by read-modify-write operations before surfacing a conflict
const MAX_UPDATE_ATTEMPTS: usize = 3;

pub struct PersistentJobStore {
    jobs: Arc<dyn ResourceStore<Job>>,
    clock: Arc<dyn Clock>,
}

impl PersistentJobStore {
    pub fn new(jobs: Arc<dyn ResourceStore<Job>>, clock: Arc<dyn Clock>) -> Self {
        Self { jobs, clock }
    }

    /// Re-reads the job and applies `apply` until the write lands.
    ///
    /// `apply` returns false when the current record needs no write, in
    /// which case the record is returned as is.
    async fn modify<F>(&self, namespace: &str, name: &str, mut apply: F) -> StoreResult<Job>
    where
        F: FnMut(&mut Job, DateTime<Utc>) -> StoreResult<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut current = self.jobs.get(namespace, name).await?;
            if !apply(&mut current, self.clock.now())? {
                return Ok(current);
            }

            match self.jobs.update(current).await {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict(reason)) if attempt < MAX_UPDATE_ATTEMPTS => {
                    debug!(
                        "Conflict updating job {}/{} (attempt {}): {}",
                        namespace, name, attempt, reason
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn lease_holder(job: &Job) -> StoreResult<&str> {
    job.status
        .lease
        .as_ref()
        .map(|lease| lease.holder.as_str())
        .ok_or_else(|| StoreError::LeaseLost(job.key()))
}

#[async_trait]
impl JobStore for PersistentJobStore {
    async fn create(&self, mut job: Job) -> StoreResult<Job> {
        job.status.phase = JobPhase::Pending;
        job.status.lease = None;
        let created = self.jobs.create(job).await?;
        info!(
            "Created job {} ({} on {})",
            created.key(),
            created.spec.action,
            created.spec.repository
        );
        Ok(created)
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Job> {
        self.jobs.get(namespace, name).await
    }

    async fn claim_next(&self, holder: &str, lease: Duration) -> StoreResult<Job> {
        let now = self.clock.now();
        let jobs = self.jobs.list().await?;

        // Repositories with a job currently under a live lease
        let busy: HashSet<(String, String)> = jobs
            .iter()
            .filter(|job| !job.is_terminal() && job.has_live_lease(now))
            .map(|job| {
                (
                    job.metadata.namespace.clone(),
                    job.spec.repository.clone(),
                )
            })
            .collect();

        let mut candidates: Vec<Job> = jobs
            .into_iter()
            .filter(|job| job.is_claimable(now))
            .collect();
        candidates.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });

        for mut job in candidates {
            let repository = (job.metadata.namespace.clone(), job.spec.repository.clone());
            if busy.contains(&repository) {
                debug!(
                    "Skipping job {}: repository {} is busy",
                    job.key(),
                    job.spec.repository
                );
                continue;
            }

            let reclaimed = job.status.lease.is_some();
            job.status.phase = JobPhase::Claimed;
            job.status.lease = Some(Lease {
                holder: holder.to_string(),
                expires_at: now + to_chrono(lease),
            });

            let key = job.key();
            match self.jobs.update(job).await {
                Ok(claimed) => {
                    if reclaimed {
                        info!("Reclaimed job {} after lease expiry ({})", key, holder);
                    } else {
                        info!("Claimed job {} ({})", key, holder);
                    }
                    return Ok(claimed);
                }
                Err(StoreError::Conflict(_)) | Err(StoreError::NotFound(_)) => {
                    debug!("Lost claim race for job {}", key);
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::NoWorkAvailable)
    }

    async fn renew_lease(&self, job: &Job, lease: Duration) -> StoreResult<Job> {
        let holder = lease_holder(job)?;
        let extension = to_chrono(lease);

        self.modify(&job.metadata.namespace, &job.metadata.name, |current, now| {
            if current.is_terminal() || !current.is_held_by(holder) {
                return Err(StoreError::LeaseLost(current.key()));
            }
            current.status.lease = Some(Lease {
                holder: holder.to_string(),
                expires_at: now + extension,
            });
            Ok(true)
        })
        .await
    }

    async fn update_status(&self, job: &Job, mutation: StatusMutation<'_>) -> StoreResult<Job> {
        let holder = lease_holder(job)?;

        self.modify(&job.metadata.namespace, &job.metadata.name, |current, _| {
            if current.is_terminal() || !current.is_held_by(holder) {
                return Err(StoreError::LeaseLost(current.key()));
            }
            mutation(&mut current.status);
            Ok(true)
        })
        .await
    }

    async fn finalize(&self, job: &Job, outcome: &JobOutcome) -> StoreResult<Job> {
        let holder = lease_holder(job)?;

        self.modify(&job.metadata.namespace, &job.metadata.name, |current, now| {
            if current.is_terminal() {
                debug!(
                    "Job {} already finalized as {}",
                    current.key(),
                    current.status.phase
                );
                return Ok(false);
            }
            if current.status.lease.is_some() && !current.is_held_by(holder) {
                return Err(StoreError::LeaseLost(current.key()));
            }

            let status = &mut current.status;
            status.phase = outcome.phase;
            status.lease = None;
            status.message = outcome.message.clone();
            status.summary = outcome.summary.clone();
            status.errors = outcome.errors.clone();
            status.results = outcome.results.clone();
            status.finished = Some(now);
            if outcome.phase == JobPhase::Succeeded {
                status.progress = 100.0;
            }
            Ok(true)
        })
        .await
    }

    async fn list_stale(&self, older_than: Duration) -> StoreResult<Vec<Job>> {
        let cutoff = self.clock.now() - to_chrono(older_than);
        let jobs = self.jobs.list().await?;
        Ok(jobs
            .into_iter()
            .filter(|job| job.is_stale(cutoff))
            .collect())
    }

    async fn list_terminal(&self) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.list().await?;
        Ok(jobs.into_iter().filter(Job::is_terminal).collect())
    }

    async fn list_active(&self, namespace: &str, repository: &str) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.list().await?;
        Ok(jobs
            .into_iter()
            .filter(|job| {
                !job.is_terminal()
                    && job.metadata.namespace == namespace
                    && job.spec.repository == repository
            })
            .collect())
    }

    async fn requeue(&self, job: &Job) -> StoreResult<Job> {
        self.modify(&job.metadata.namespace, &job.metadata.name, |current, now| {
            if !current.is_stale(now) {
                return Ok(false);
            }
            if let Some(lease) = &current.status.lease {
                warn!(
                    "Requeueing job {}: lease held by {} expired at {}",
                    current.key(),
                    lease.holder,
                    lease.expires_at
                );
            }
            current.status.phase = JobPhase::Pending;
            current.status.lease = None;
            current.status.message = Some("requeued after lease expiry".to_string());
            Ok(true)
        })
        .await
    }

    async fn remove(&self, job: &Job) -> StoreResult<()> {
        match self
            .jobs
            .delete(&job.metadata.namespace, &job.metadata.name)
            .await
        {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
