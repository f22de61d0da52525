//! Push (export) worker: writes namespace resources into the repository

use async_trait::async_trait;
use provisioner_core::domain::job::{FileAction, Job, JobSummary, ResourceResult};
use provisioner_core::domain::resource::ManagedResource;
use tracing::info;

use super::{JobContext, Worker, WorkerError};
use crate::backend::{Backend, Stage, StageOptions};
use crate::resources::RepositoryHandle;

#[derive(Debug, Default)]
pub struct ExportWorker;

impl ExportWorker {
    pub fn new() -> Self {
        Self
    }
}

async fn export_one(
    writer: &dyn Backend,
    resource: &ManagedResource,
    path: &str,
    message: &str,
) -> ResourceResult {
    let result = ResourceResult::new(FileAction::Created, path)
        .with_resource(resource.kind.clone(), resource.name.clone());

    let action = match writer.read_file(path).await {
        Ok(current) if current == resource.body => {
            return ResourceResult {
                action: FileAction::Ignored,
                ..result
            };
        }
        Ok(_) => FileAction::Updated,
        Err(e) if e.is_not_found() => FileAction::Created,
        Err(e) => return result.with_error(format!("reading existing file: {}", e)),
    };

    let result = ResourceResult { action, ..result };
    match writer.write_file(path, &resource.body, message).await {
        Ok(()) => result,
        Err(e) => result.with_error(format!("writing file: {}", e)),
    }
}

#[async_trait]
impl Worker for ExportWorker {
    async fn execute(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
    ) -> Result<JobSummary, WorkerError> {
        ctx.check()?;
        let options = job.spec.push.clone().unwrap_or_default();
        let progress = ctx.progress();

        progress.set_message("list resources");
        let (resources, foreign): (Vec<ManagedResource>, Vec<ManagedResource>) = repo
            .resources
            .list()
            .await
            .map_err(|e| WorkerError::from(e).context("list resources"))?
            .into_iter()
            .partition(|r| r.is_available_to(repo.name()));

        if !foreign.is_empty() {
            progress.add_warning(format!(
                "skipped {} resource(s) managed by another repository",
                foreign.len()
            ));
        }

        if resources.is_empty() {
            progress.set_final_message("no resources to export");
            return Ok(progress.summary());
        }

        let message = options
            .message
            .clone()
            .unwrap_or_else(|| "Export from provisioner".to_string());
        let stage = Stage::open(repo.backend.as_ref(), &StageOptions::commit_once(&message))
            .await
            .map_err(|e| WorkerError::from(e).context("stage repository"))?;

        info!(
            "Exporting {} resource(s) from {} into {}",
            resources.len(),
            repo.resources.namespace(),
            repo.name()
        );
        progress.set_total(resources.len());

        for resource in &resources {
            ctx.check()?;
            progress.too_many_errors()?;

            let path = resource.export_path(options.path.as_deref());
            progress.set_message(format!("Exporting {}", path));
            let result = export_one(stage.writer(), resource, &path, &message).await;
            progress.record(result);
        }

        stage
            .finish()
            .await
            .map_err(|e| WorkerError::from(e).context("push changes"))?;

        Ok(progress.summary())
    }
}
