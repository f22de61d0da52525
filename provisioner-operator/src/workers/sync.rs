//! Pull (sync) worker
//!
//! Brings a repository's managed namespace in line with the files in its
//! backend. A comparator plans the file-level changes, full or incremental,
//! and the worker applies them one resource at a time.

use async_trait::async_trait;
use provisioner_client::UpsertOutcome;
use provisioner_core::domain::job::{FileAction, Job, JobSummary, ResourceResult};
use provisioner_core::domain::patch::PatchOperation;
use provisioner_core::domain::repository::{Repository, SyncState, SyncStatus};
use provisioner_core::domain::resource::ManagedResource;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{JobContext, Worker, WorkerError};
use crate::clock::Clock;
use crate::resources::RepositoryHandle;
use crate::store::ResourceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

/// One change the worker has to apply to the namespace
#[derive(Debug, Clone)]
pub struct ResourceFileChange {
    pub action: FileAction,
    pub path: String,
    /// File contents, when already read during comparison
    pub body: Option<JsonValue>,
    /// The namespace resource this change replaces or removes
    pub existing: Option<ManagedResource>,
}

#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub mode: SyncMode,
    /// Deletions come first so a resource whose file moved is not removed
    /// after being written under its new path
    pub changes: Vec<ResourceFileChange>,
    pub unchanged: usize,
    /// Backend revision the namespace matches once the plan is applied
    pub target_ref: Option<String>,
    /// Owners of namespace resources held by other repositories, by kind and name
    pub foreign: HashMap<(String, String), String>,
}

/// Decides what a sync has to do
#[async_trait]
pub trait Comparator: Send + Sync {
    async fn compare(
        &self,
        repo: &RepositoryHandle,
        incremental: bool,
    ) -> Result<SyncPlan, WorkerError>;
}

/// Diffs the backend against resources managed by the repository
pub struct DefaultComparator;

type ForeignOwners = HashMap<(String, String), String>;

impl DefaultComparator {
    /// Splits the namespace into this repository's resources and the owners
    /// of resources managed elsewhere
    async fn managed(
        &self,
        repo: &RepositoryHandle,
    ) -> Result<(Vec<ManagedResource>, ForeignOwners), WorkerError> {
        let mut managed = Vec::new();
        let mut foreign = HashMap::new();
        for resource in repo.resources.list().await? {
            match &resource.manager {
                Some(owner) if owner != repo.name() => {
                    foreign.insert((resource.kind.clone(), resource.name.clone()), owner.clone());
                }
                Some(_) => managed.push(resource),
                None => {}
            }
        }
        Ok((managed, foreign))
    }

    async fn full(
        &self,
        repo: &RepositoryHandle,
        target_ref: Option<String>,
    ) -> Result<SyncPlan, WorkerError> {
        let files = repo.backend.list_files().await?;
        let (owned, foreign) = self.managed(repo).await?;
        let mut managed: HashMap<(String, String), ManagedResource> = owned
            .into_iter()
            .map(|r| ((r.kind.clone(), r.name.clone()), r))
            .collect();

        let mut writes = Vec::new();
        let mut unreadable = HashSet::new();
        let mut unchanged = 0;

        for path in files {
            let body = match repo.backend.read_file(&path).await {
                Ok(body) => body,
                Err(e) => {
                    // Applying re-reads the file and records the failure
                    debug!("Cannot read {} during comparison: {}", path, e);
                    unreadable.insert(path.clone());
                    writes.push(ResourceFileChange {
                        action: FileAction::Updated,
                        path,
                        body: None,
                        existing: None,
                    });
                    continue;
                }
            };

            let incoming = ManagedResource::from_file(&path, body.clone(), repo.name());
            match managed.remove(&(incoming.kind, incoming.name)) {
                Some(existing)
                    if existing.body == body
                        && existing.source_path.as_deref() == Some(path.as_str()) =>
                {
                    unchanged += 1;
                }
                Some(existing) => writes.push(ResourceFileChange {
                    action: FileAction::Updated,
                    path,
                    body: Some(body),
                    existing: Some(existing),
                }),
                None => writes.push(ResourceFileChange {
                    action: FileAction::Created,
                    path,
                    body: Some(body),
                    existing: None,
                }),
            }
        }

        let mut changes: Vec<ResourceFileChange> = managed
            .into_values()
            .filter(|existing| {
                !existing
                    .source_path
                    .as_ref()
                    .is_some_and(|p| unreadable.contains(p))
            })
            .map(|existing| ResourceFileChange {
                action: FileAction::Deleted,
                path: existing.source_path.clone().unwrap_or_default(),
                body: None,
                existing: Some(existing),
            })
            .collect();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes.extend(writes);

        Ok(SyncPlan {
            mode: SyncMode::Full,
            changes,
            unchanged,
            target_ref,
            foreign,
        })
    }

    /// Plans from the backend's own diff; `None` when it cannot provide one
    async fn incremental(
        &self,
        repo: &RepositoryHandle,
        since: &str,
        target_ref: Option<String>,
    ) -> Result<Option<SyncPlan>, WorkerError> {
        let Some(file_changes) = repo.backend.changes_since(since).await? else {
            return Ok(None);
        };

        // Latest change per path wins
        let mut latest: BTreeMap<String, (FileAction, Option<String>)> = BTreeMap::new();
        for change in file_changes {
            if let Some(previous) = &change.previous_path {
                latest.remove(previous);
            }
            latest.insert(change.path, (change.action, change.previous_path));
        }

        let (owned, foreign) = self.managed(repo).await?;
        let by_path: HashMap<String, ManagedResource> = owned
            .into_iter()
            .filter_map(|r| r.source_path.clone().map(|p| (p, r)))
            .collect();

        let mut deletions = Vec::new();
        let mut writes = Vec::new();
        for (path, (action, previous)) in latest {
            match action {
                FileAction::Deleted => match by_path.get(&path) {
                    Some(existing) => deletions.push(ResourceFileChange {
                        action,
                        path,
                        body: None,
                        existing: Some(existing.clone()),
                    }),
                    None => debug!("Ignoring deletion of unmanaged file {}", path),
                },
                FileAction::Moved => writes.push(ResourceFileChange {
                    action: FileAction::Updated,
                    existing: previous.and_then(|p| by_path.get(&p).cloned()),
                    path,
                    body: None,
                }),
                FileAction::Created | FileAction::Updated => writes.push(ResourceFileChange {
                    action,
                    existing: by_path.get(&path).cloned(),
                    path,
                    body: None,
                }),
                FileAction::Ignored => {}
            }
        }
        deletions.extend(writes);

        Ok(Some(SyncPlan {
            mode: SyncMode::Incremental,
            changes: deletions,
            unchanged: 0,
            target_ref,
            foreign,
        }))
    }
}

#[async_trait]
impl Comparator for DefaultComparator {
    async fn compare(
        &self,
        repo: &RepositoryHandle,
        incremental: bool,
    ) -> Result<SyncPlan, WorkerError> {
        let target_ref = repo.backend.latest_ref().await?;

        if incremental {
            let last_ref = repo.repository.status.sync.last_ref.as_deref();
            match (last_ref, target_ref.as_deref()) {
                (Some(last), Some(current)) if last == current => {
                    return Ok(SyncPlan {
                        mode: SyncMode::Incremental,
                        changes: Vec::new(),
                        unchanged: 0,
                        target_ref,
                        foreign: HashMap::new(),
                    });
                }
                (Some(last), Some(_)) => {
                    if let Some(plan) = self.incremental(repo, last, target_ref.clone()).await? {
                        return Ok(plan);
                    }
                }
                _ => {}
            }
            debug!("Falling back to full sync for {}", repo.name());
        }

        self.full(repo, target_ref).await
    }
}

pub struct SyncWorker {
    repositories: Arc<dyn ResourceStore<Repository>>,
    comparator: Arc<dyn Comparator>,
    clock: Arc<dyn Clock>,
}

impl SyncWorker {
    pub fn new(
        repositories: Arc<dyn ResourceStore<Repository>>,
        comparator: Arc<dyn Comparator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repositories,
            comparator,
            clock,
        }
    }

    async fn sync(
        &self,
        ctx: &JobContext,
        repo: &RepositoryHandle,
        incremental: bool,
    ) -> Result<(JobSummary, Option<String>), WorkerError> {
        let progress = ctx.progress();
        progress.set_message("compare changes");

        let plan = self
            .comparator
            .compare(repo, incremental)
            .await
            .map_err(|e| e.context("compare changes"))?;
        progress.record_unchanged(plan.unchanged);

        if plan.changes.is_empty() {
            progress.set_final_message("no changes to sync");
            return Ok((progress.summary(), plan.target_ref));
        }

        info!(
            "Applying {} change(s) to {} ({:?} sync)",
            plan.changes.len(),
            repo.resources.namespace(),
            plan.mode
        );
        progress.set_total(plan.changes.len());
        progress.set_message("applying changes");

        for change in plan.changes {
            ctx.check()?;
            progress.too_many_errors()?;
            let result = self.apply(repo, change, &plan.foreign).await;
            progress.record(result);
        }

        Ok((progress.summary(), plan.target_ref))
    }

    async fn apply(
        &self,
        repo: &RepositoryHandle,
        change: ResourceFileChange,
        foreign: &ForeignOwners,
    ) -> ResourceResult {
        let ResourceFileChange {
            action,
            path,
            body,
            existing,
        } = change;

        match action {
            FileAction::Ignored => ResourceResult::new(FileAction::Ignored, path),
            FileAction::Deleted => {
                let Some(existing) = existing else {
                    return ResourceResult::new(FileAction::Deleted, path)
                        .with_error("missing existing reference");
                };
                let result = ResourceResult::new(FileAction::Deleted, path)
                    .with_resource(existing.kind.clone(), existing.name.clone());
                match repo.resources.delete(&existing.kind, &existing.name).await {
                    Ok(()) => result,
                    Err(e) => result.with_error(format!(
                        "deleting resource {}/{}: {}",
                        existing.kind, existing.name, e
                    )),
                }
            }
            _ => {
                let body = match body {
                    Some(body) => body,
                    None => match repo.backend.read_file(&path).await {
                        Ok(body) => body,
                        Err(e) => {
                            return ResourceResult::new(action, path)
                                .with_error(format!("reading file: {}", e));
                        }
                    },
                };

                let resource = ManagedResource::from_file(&path, body, repo.name());
                let result = ResourceResult::new(action, path)
                    .with_resource(resource.kind.clone(), resource.name.clone());
                let key = (resource.kind.clone(), resource.name.clone());
                if let Some(owner) = foreign.get(&key) {
                    debug!(
                        "Not syncing {}/{}: owned by repository {}",
                        resource.kind, resource.name, owner
                    );
                    return result.with_error(format!(
                        "resource is managed by another repository ({})",
                        owner
                    ));
                }
                match repo.resources.upsert(&resource).await {
                    Ok(UpsertOutcome::Created) => ResourceResult {
                        action: FileAction::Created,
                        ..result
                    },
                    Ok(UpsertOutcome::Updated) => ResourceResult {
                        action: FileAction::Updated,
                        ..result
                    },
                    Err(e) => result.with_error(format!("writing resource: {}", e)),
                }
            }
        }
    }

    /// Records sync state on the repository; failures only cost visibility
    async fn set_sync_status(&self, repo: &RepositoryHandle, status: SyncStatus) {
        let meta = &repo.repository.metadata;
        let value = match serde_json::to_value(&status) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode sync status for {}: {}", meta.key(), e);
                return;
            }
        };

        if let Err(e) = self
            .repositories
            .patch_status(
                &meta.namespace,
                &meta.name,
                &[PatchOperation::replace("/status/sync", value)],
            )
            .await
        {
            warn!("Failed to update sync status of {}: {}", meta.key(), e);
        }
    }
}

#[async_trait]
impl Worker for SyncWorker {
    async fn execute(
        &self,
        ctx: &JobContext,
        job: &Job,
        repo: &RepositoryHandle,
    ) -> Result<JobSummary, WorkerError> {
        ctx.check()?;
        let incremental = job.spec.pull.as_ref().is_some_and(|p| p.incremental);
        let previous = repo.repository.status.sync.clone();

        self.set_sync_status(
            repo,
            SyncStatus {
                state: SyncState::Working,
                job: Some(job.metadata.name.clone()),
                last_ref: previous.last_ref.clone(),
                finished: None,
                message: Vec::new(),
            },
        )
        .await;

        let result = self.sync(ctx, repo, incremental).await;
        let finished = self.clock.now();

        let status = match &result {
            Ok((summary, target_ref)) if summary.errors == 0 => SyncStatus {
                state: SyncState::Success,
                job: Some(job.metadata.name.clone()),
                last_ref: target_ref.clone().or(previous.last_ref),
                finished: Some(finished),
                message: Vec::new(),
            },
            // Failed files are retried by the next sync, so the ref stays put
            Ok((summary, _)) => SyncStatus {
                state: SyncState::Error,
                job: Some(job.metadata.name.clone()),
                last_ref: previous.last_ref,
                finished: Some(finished),
                message: vec![format!("{} resource(s) failed to sync", summary.errors)],
            },
            Err(e) => SyncStatus {
                state: SyncState::Error,
                job: Some(job.metadata.name.clone()),
                last_ref: previous.last_ref,
                finished: Some(finished),
                message: vec![e.to_string()],
            },
        };
        self.set_sync_status(repo, status).await;

        result.map(|(summary, _)| summary)
    }
}
