//! Migrate worker
//!
//! Hands a namespace over to a repository in three stages: release this
//! repository's ownership markers, export everything available into the
//! repository, then pull it back so every resource ends up owned by it.

use async_trait::async_trait;
use provisioner_core::domain::job::{ExportJobOptions, Job, JobSummary};
use std::sync::Arc;
use tracing::info;

use super::{JobContext, Worker, WorkerError, follow_up_pull};
use crate::resources::RepositoryHandle;

pub struct MigrateWorker {
    export: Arc<dyn Worker>,
    sync: Arc<dyn Worker>,
}

impl MigrateWorker {
    pub fn new(export: Arc<dyn Worker>, sync: Arc<dyn Worker>) -> Self {
        Self { export, sync }
    }

    /// Clears the manager of resources owned by this repository
    async fn release_ownership(
        &self,
        ctx: &JobContext,
        repo: &RepositoryHandle,
    ) -> Result<usize, WorkerError> {
        let owned: Vec<_> = repo
            .resources
            .list()
            .await?
            .into_iter()
            .filter(|r| r.is_managed_by(repo.name()))
            .collect();

        for resource in &owned {
            ctx.check()?;
            let mut released = resource.clone();
            released.manager = None;
            repo.resources.upsert(&released).await?;
        }
        Ok(owned.len())
    }
}

#[async_trait]
impl Worker for MigrateWorker {
    async fn execute(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
    ) -> Result<JobSummary, WorkerError> {
        ctx.check()?;
        let options = job.spec.migrate.clone().unwrap_or_default();
        let progress = ctx.progress();
        let mut summary = JobSummary::default();

        progress.set_message("clean namespace");
        let released = self
            .release_ownership(ctx, repo)
            .await
            .map_err(|e| e.context("clean namespace"))?;
        if released > 0 {
            info!("Released {} resource(s) owned by {}", released, repo.name());
        }

        progress.reset_results();
        progress.set_message("export resources");
        let mut export_job = job.clone();
        export_job.spec.push = Some(ExportJobOptions {
            path: None,
            message: options.message,
        });
        let exported = self
            .export
            .execute(ctx, &export_job, repo)
            .await
            .map_err(|e| e.context("export resources"))?;
        summary.merge(&exported);

        progress.reset_results();
        progress.set_message("pull resources");
        let pulled = self
            .sync
            .execute(ctx, &follow_up_pull(job), repo)
            .await
            .map_err(|e| e.context("pull resources"))?;
        summary.merge(&pulled);

        Ok(summary)
    }
}
