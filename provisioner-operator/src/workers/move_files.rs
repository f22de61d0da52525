//! Move worker: relocates files inside the repository, then pulls

use async_trait::async_trait;
use provisioner_core::domain::job::{FileAction, Job, JobSummary, ResourceResult};
use std::sync::Arc;

use super::{JobContext, Worker, WorkerError, deduplicate_paths, follow_up_pull};
use crate::backend::{Stage, StageOptions};
use crate::resources::RepositoryHandle;

/// Destination of `path` inside `target_dir`; directories keep their trailing `/`
fn move_target(path: &str, target_dir: &str) -> String {
    let dir = target_dir.trim_end_matches('/');
    let trimmed = path.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let suffix = if path.ends_with('/') { "/" } else { "" };

    if dir.is_empty() {
        format!("{}{}", base, suffix)
    } else {
        format!("{}/{}{}", dir, base, suffix)
    }
}

pub struct MoveWorker {
    sync: Arc<dyn Worker>,
}

impl MoveWorker {
    pub fn new(sync: Arc<dyn Worker>) -> Self {
        Self { sync }
    }

    async fn move_files(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
        paths: &[String],
        target_dir: &str,
        git_ref: Option<String>,
    ) -> Result<(), WorkerError> {
        let progress = ctx.progress();
        let options =
            StageOptions::commit_once(format!("Move from provisioner {}", job.metadata.name))
                .with_ref(git_ref);
        let stage = Stage::open(repo.backend.as_ref(), &options).await?;

        for path in paths {
            ctx.check()?;
            let target = move_target(path, target_dir);
            progress.set_message(format!("Moving {} to {}", path, target));

            let mut result = ResourceResult::new(FileAction::Moved, target.clone());
            if let Err(e) = stage
                .writer()
                .move_file(path, &target, &format!("Move {} to {}", path, target))
                .await
            {
                result = result.with_error(format!("moving {}: {}", path, e));
            }
            progress.record(result);
            progress.too_many_errors()?;
        }

        stage.finish().await?;
        Ok(())
    }
}

#[async_trait]
impl Worker for MoveWorker {
    async fn execute(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
    ) -> Result<JobSummary, WorkerError> {
        let options = job
            .spec
            .move_files
            .as_ref()
            .ok_or_else(|| WorkerError::InvalidJob("missing move settings".to_string()))?;
        if options.target_path.trim_matches('/').is_empty() {
            return Err(WorkerError::InvalidJob("missing target path".to_string()));
        }
        let paths = deduplicate_paths(&options.paths);
        if paths.is_empty() {
            return Err(WorkerError::InvalidJob("no paths to move".to_string()));
        }

        let progress = ctx.progress();
        progress.set_total(paths.len());
        progress.strict_max_errors(1);

        self.move_files(
            ctx,
            job,
            repo,
            &paths,
            &options.target_path,
            options.git_ref.clone(),
        )
        .await
        .map_err(|e| e.context("move files in repository"))?;
        let mut summary = progress.summary();

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
