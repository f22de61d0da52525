//! Delete worker: removes files from the repository, then pulls

use async_trait::async_trait;
use provisioner_core::domain::job::{FileAction, Job, JobSummary, ResourceResult};
use std::sync::Arc;

use super::{JobContext, Worker, WorkerError, deduplicate_paths, follow_up_pull};
use crate::backend::{Stage, StageOptions};
use crate::resources::RepositoryHandle;

pub struct DeleteWorker {
    sync: Arc<dyn Worker>,
}

impl DeleteWorker {
    pub fn new(sync: Arc<dyn Worker>) -> Self {
        Self { sync }
    }

    async fn delete_files(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
        paths: &[String],
        git_ref: Option<String>,
    ) -> Result<(), WorkerError> {
        let progress = ctx.progress();
        let options =
            StageOptions::commit_once(format!("Delete from provisioner {}", job.metadata.name))
                .with_ref(git_ref);
        let stage = Stage::open(repo.backend.as_ref(), &options).await?;

        for path in paths {
            ctx.check()?;
            progress.set_message(format!("Deleting {}", path));

            let mut result = ResourceResult::new(FileAction::Deleted, path.clone());
            if let Err(e) = stage
                .writer()
                .delete_file(path, &format!("Delete {}", path))
                .await
            {
                result = result.with_error(e);
            }
            progress.record(result);
            progress.too_many_errors()?;
        }

        stage.finish().await?;
        Ok(())
    }
}

#[async_trait]
impl Worker for DeleteWorker {
    async fn execute(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
    ) -> Result<JobSummary, WorkerError> {
        let options = job
            .spec
            .delete
            .as_ref()
            .ok_or_else(|| WorkerError::InvalidJob("missing delete settings".to_string()))?;
        let paths = deduplicate_paths(&options.paths);
        if paths.is_empty() {
            return Err(WorkerError::InvalidJob("no paths to delete".to_string()));
        }

        let progress = ctx.progress();
        progress.set_total(paths.len());
        progress.strict_max_errors(1);

        self.delete_files(ctx, job, repo, &paths, options.git_ref.clone())
            .await
            .map_err(|e| e.context("delete files from repository"))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBackend, MemoryNamespace, dashboard, handle_fixture, job_fixture};
    use crate::workers::ProgressRecorder;
    use provisioner_core::domain::job::{DeleteJobOptions, JobAction, JobSpec};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Sync stand-in that records the jobs it was handed
    #[derive(Default)]
    struct RecordingSync {
        jobs: Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl Worker for RecordingSync {
        async fn execute(
            &self,
            _ctx: &JobContext,
            job: &Job,
            _repo: &RepositoryHandle,
        ) -> Result<JobSummary, WorkerError> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(JobSummary::default())
        }
    }

    fn context() -> JobContext {
        JobContext::new(CancellationToken::new(), Arc::new(ProgressRecorder::new()))
    }

    fn delete_job(paths: &[&str]) -> Job {
        let mut job = job_fixture("default", "delete-1", JobAction::Delete, "repo");
        job.spec.delete = Some(DeleteJobOptions {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            git_ref: None,
        });
        job
    }

    #[tokio::test]
    async fn test_missing_settings() {
        let backend = MemoryBackend::new();
        let handle = handle_fixture(&backend, &Arc::new(MemoryNamespace::new("default")));
        let worker = DeleteWorker::new(Arc::new(RecordingSync::default()));

        let mut job = delete_job(&[]);
        job.spec = JobSpec::new(JobAction::Delete, "repo");
        let err = worker.execute(&context(), &job, &handle).await.unwrap_err();
        assert_eq!(err.to_string(), "missing delete settings");
    }

    #[tokio::test]
    async fn test_deletes_each_path_once_then_pulls() {
        let backend = MemoryBackend::versioned().with_files([
            ("a.json", dashboard("a", "A")),
            ("b.json", dashboard("b", "B")),
            ("c.json", dashboard("c", "C")),
        ]);
        let handle = handle_fixture(&backend, &Arc::new(MemoryNamespace::new("default")));
        let sync = Arc::new(RecordingSync::default());
        let worker = DeleteWorker::new(sync.clone());

        let ctx = context();
        let summary = worker
            .execute(&ctx, &delete_job(&["a.json", "b.json", "a.json"]), &handle)
            .await
            .unwrap();

        assert_eq!(summary.deleted, 2);
        assert_eq!(backend.paths(), vec!["c.json"]);
        assert_eq!(backend.pushes(), 1);

        let results = ctx.progress().results();
        let deleted: Vec<_> = results.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(deleted, vec!["a.json", "b.json"]);

        let pulls = sync.jobs.lock().unwrap();
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0].spec.action, JobAction::Pull);
        assert!(!pulls[0].spec.pull.as_ref().unwrap().incremental);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_without_pull() {
        let backend = MemoryBackend::versioned().with_files([("a.json", dashboard("a", "A"))]);
        let handle = handle_fixture(&backend, &Arc::new(MemoryNamespace::new("default")));
        let sync = Arc::new(RecordingSync::default());
        let worker = DeleteWorker::new(sync.clone());

        let err = worker
            .execute(&context(), &delete_job(&["missing.json", "a.json"]), &handle)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("delete files from repository: too many errors"));
        // Nothing was published and no pull ran
        assert_eq!(backend.paths(), vec!["a.json"]);
        assert_eq!(backend.pushes(), 0);
        assert!(sync.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_failure_is_wrapped() {
        struct FailingSync;

        #[async_trait]
        impl Worker for FailingSync {
            async fn execute(
                &self,
                _ctx: &JobContext,
                _job: &Job,
                _repo: &RepositoryHandle,
            ) -> Result<JobSummary, WorkerError> {
                Err(WorkerError::InvalidJob("sync failed".to_string()))
            }
        }

        let backend = MemoryBackend::new().with_files([("a.json", dashboard("a", "A"))]);
        let handle = handle_fixture(&backend, &Arc::new(MemoryNamespace::new("default")));
        let worker = DeleteWorker::new(Arc::new(FailingSync));

        let err = worker
            .execute(&context(), &delete_job(&["a.json"]), &handle)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "pull resources: sync failed");
    }
}
