//! Repository controller
//!
//! Watch events only enqueue keys; a single worker drains the queue and
//! reconciles each repository. Failed reconciles are retried with
//! exponential backoff until they succeed or the repository disappears.
//!
//! Every resync also checks the repository's sync schedule and queues an
//! incremental pull once the interval has passed.

use provisioner_core::domain::Resource;
use provisioner_core::domain::job::{Job, JobSpec};
use provisioner_core::domain::meta::{ObjectMeta, split_key};
use provisioner_core::domain::patch::PatchOperation;
use provisioner_core::domain::repository::{HealthStatus, Repository};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::informer::WatchEvent;
use super::queue::RetryQueue;
use crate::clock::Clock;
use crate::resources::ClientFactory;
use crate::store::{JobStore, ResourceStore, StoreError, StoreResult};

pub struct RepositoryController {
    store: Arc<dyn ResourceStore<Repository>>,
    jobs: Arc<dyn JobStore>,
    factory: Arc<dyn ClientFactory>,
    clock: Arc<dyn Clock>,
    queue: Arc<RetryQueue<String>>,
}

impl RepositoryController {
    pub fn new(
        store: Arc<dyn ResourceStore<Repository>>,
        jobs: Arc<dyn JobStore>,
        factory: Arc<dyn ClientFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            jobs,
            factory,
            clock,
            queue: Arc::new(RetryQueue::default()),
        }
    }

    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<WatchEvent<Repository>>,
        shutdown: CancellationToken,
    ) {
        info!("Starting repository controller");

        let queue = Arc::clone(&self.queue);
        let token = shutdown.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => queue.add(event.object().key()),
                        None => break,
                    },
                }
            }
            queue.shut_down();
        });

        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
        }

        if let Err(e) = pump.await {
            warn!("Repository event pump panicked: {}", e);
        }
        debug!("Repository controller stopped");
    }

    /// Reconciles one key and settles it in the queue
    pub async fn process(&self, key: &String) {
        match self.reconcile(key).await {
            Ok(()) => self.queue.forget(key),
            Err(e) => {
                warn!(
                    "Failed to reconcile repository {} (retry {}): {}",
                    key,
                    self.queue.num_requeues(key) + 1,
                    e
                );
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(key);
    }

    pub async fn reconcile(&self, key: &str) -> StoreResult<()> {
        let Some((namespace, name)) = split_key(key) else {
            warn!("Dropping malformed repository key '{}'", key);
            return Ok(());
        };

        let repository = match self.store.get(namespace, name).await {
            Ok(repository) => repository,
            Err(StoreError::NotFound(_)) => {
                debug!("Repository {} is gone, nothing to reconcile", key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let healthy = if repository.needs_reconcile() {
            self.refresh_health(&repository).await?
        } else {
            repository.status.health.healthy
        };

        if healthy {
            self.schedule_sync(&repository).await
        } else {
            if repository.spec.sync.enabled {
                debug!("Not scheduling sync for unhealthy repository {}", key);
            }
            Ok(())
        }
    }

    /// Probes the backend and records health for the current generation
    async fn refresh_health(&self, repository: &Repository) -> StoreResult<bool> {
        let meta = &repository.metadata;
        let health = self.check_health(repository).await;
        if !health.healthy {
            warn!(
                "Repository {} is unhealthy: {}",
                meta.key(),
                health.message.join("; ")
            );
        }

        let ops = [
            PatchOperation::replace("/status/observedGeneration", meta.generation),
            PatchOperation::replace("/status/health", json!(health)),
        ];
        self.store
            .patch_status(&meta.namespace, &meta.name, &ops)
            .await?;

        info!(
            "Reconciled repository {} at generation {}",
            meta.key(),
            meta.generation
        );
        Ok(health.healthy)
    }

    /// Creates an incremental pull once the sync interval has passed and
    /// nothing else is queued for the repository
    async fn schedule_sync(&self, repository: &Repository) -> StoreResult<()> {
        let now = self.clock.now();
        if !repository.sync_due(now) {
            return Ok(());
        }

        let meta = &repository.metadata;
        let active = self.jobs.list_active(&meta.namespace, &meta.name).await?;
        if let Some(job) = active.first() {
            debug!(
                "Sync of {} waits for job {} ({})",
                meta.key(),
                job.metadata.name,
                job.status.phase
            );
            return Ok(());
        }

        let job = Job::new(
            ObjectMeta::new(
                meta.namespace.clone(),
                format!("{}-sync-{}", meta.name, now.timestamp()),
            ),
            JobSpec::pull(meta.name.clone(), true),
        );
        match self.jobs.create(job).await {
            Ok(job) => {
                info!("Scheduled sync of {} as job {}", meta.key(), job.metadata.name);
                Ok(())
            }
            Err(StoreError::AlreadyExists(name)) => {
                debug!("Sync job {} already exists", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn check_health(&self, repository: &Repository) -> HealthStatus {
        let result = match self.factory.clients_for(repository).await {
            Ok(handle) => handle.backend.test().await,
            Err(e) => Err(e),
        };

        HealthStatus {
            healthy: result.is_ok(),
            checked: Some(self.clock.now()),
            message: result.err().map(|e| vec![e.to_string()]).unwrap_or_default(),
        }
    }
}
