//! Concurrent job driver
//!
//! Runs a fixed number of claim loops. Each loop claims one job at a time,
//! keeps its lease alive while the worker runs, finalizes the outcome,
//! archives it and removes the live job. A cleanup loop requeues jobs whose
//! holder died and archives terminal jobs left behind by a crash.

use provisioner_core::domain::Resource;
use provisioner_core::domain::job::{Job, JobOutcome, JobPhase, JobStatus, JobSummary};
use provisioner_core::domain::repository::Repository;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::DriverConfig;
use crate::resources::{ClientFactory, RepositoryHandle};
use crate::store::{HistoryWriter, JobStore, ResourceStore, StoreError};
use crate::workers::{JobContext, ProgressRecorder, WorkerError, WorkerRegistry};

/// Attempts made to finalize a job before leaving it to lease expiry
const FINALIZE_ATTEMPTS: u32 = 3;

/// How a job's execution ended
enum Completion {
    Finished(Result<JobSummary, WorkerError>),
    TimedOut,
    LeaseLost,
    Shutdown,
}

pub struct JobDriver {
    config: DriverConfig,
    store: Arc<dyn JobStore>,
    repositories: Arc<dyn ResourceStore<Repository>>,
    factory: Arc<dyn ClientFactory>,
    workers: WorkerRegistry,
    history: HistoryWriter,
    clock: Arc<dyn Clock>,
    notifications: Mutex<mpsc::Receiver<()>>,
}

impl JobDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DriverConfig,
        store: Arc<dyn JobStore>,
        repositories: Arc<dyn ResourceStore<Repository>>,
        factory: Arc<dyn ClientFactory>,
        workers: WorkerRegistry,
        history: HistoryWriter,
        clock: Arc<dyn Clock>,
        notifications: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            config,
            store,
            repositories,
            factory,
            workers,
            history,
            clock,
            notifications: Mutex::new(notifications),
        }
    }

    /// Runs the claim loops and the cleanup loop until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Starting job driver {} with {} claim loop(s) (poll interval: {:?})",
            self.config.driver_id, self.config.parallel_drivers, self.config.poll_interval
        );

        let mut handles = Vec::new();

        let driver = Arc::clone(&self);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { driver.cleanup_loop(token).await }));

        for i in 0..self.config.parallel_drivers {
            let driver = Arc::clone(&self);
            let token = shutdown.clone();
            let holder = format!("{}-{}", self.config.driver_id, i);
            handles.push(tokio::spawn(async move {
                driver.claim_loop(holder, token).await
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Driver task panicked: {}", e);
            }
        }

        info!("Job driver {} stopped", self.config.driver_id);
    }

    async fn claim_loop(&self, holder: String, shutdown: CancellationToken) {
        debug!("Claim loop {} started", holder);

        while !shutdown.is_cancelled() {
            match self
                .store
                .claim_next(&holder, self.config.lease_duration)
                .await
            {
                Ok(job) => self.process_job(&holder, job, &shutdown).await,
                Err(StoreError::NoWorkAvailable) => self.wait_for_work(&shutdown).await,
                Err(e) => {
                    warn!("Claim loop {} failed to claim a job: {}", holder, e);
                    self.wait_for_work(&shutdown).await;
                }
            }
        }

        debug!("Claim loop {} stopped", holder);
    }

    /// Sleeps until a notification arrives, the poll interval passes or shutdown
    async fn wait_for_work(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = time::sleep(self.config.poll_interval) => {}
            _ = self.next_notification() => debug!("Woken by job notification"),
        }
    }

    async fn next_notification(&self) {
        let mut receiver = self.notifications.lock().await;
        if receiver.recv().await.is_none() {
            // Senders are gone; fall back to polling only
            drop(receiver);
            std::future::pending::<()>().await;
        }
    }

    async fn process_job(&self, holder: &str, job: Job, shutdown: &CancellationToken) {
        let key = job.key();
        let started = Instant::now();
        info!(
            "Processing job {} ({} on {}, holder {})",
            key, job.spec.action, job.spec.repository, holder
        );

        let now = self.clock.now();
        let job = match self
            .store
            .update_status(&job, &move |status: &mut JobStatus| {
                status.phase = JobPhase::Running;
                status.started = Some(now);
            })
            .await
        {
            Ok(running) => running,
            Err(StoreError::LeaseLost(_)) => {
                warn!("Lost job {} before it started", key);
                return;
            }
            Err(e) => {
                warn!("Failed to mark job {} running: {}", key, e);
                job
            }
        };

        let token = shutdown.child_token();
        let progress = Arc::new(ProgressRecorder::new());
        let completion = self.execute(&job, &token, &progress).await;

        self.complete(job, completion, &progress, started).await;
    }

    async fn repository_handle(&self, job: &Job) -> Result<RepositoryHandle, WorkerError> {
        let repository = self
            .repositories
            .get(&job.metadata.namespace, &job.spec.repository)
            .await
            .map_err(|e| WorkerError::from(e).context("load repository"))?;

        self.factory
            .clients_for(&repository)
            .await
            .map_err(|e| WorkerError::from(e).context("create repository clients"))
    }

    async fn execute(
        &self,
        job: &Job,
        token: &CancellationToken,
        progress: &Arc<ProgressRecorder>,
    ) -> Completion {
        let Some(worker) = self.workers.get(job.spec.action) else {
            return Completion::Finished(Err(WorkerError::UnsupportedAction(job.spec.action)));
        };

        let handle = match self.repository_handle(job).await {
            Ok(handle) => handle,
            Err(e) => return Completion::Finished(Err(e)),
        };

        let ctx = JobContext::new(token.clone(), Arc::clone(progress));
        let lease_lost = Arc::new(AtomicBool::new(false));
        let renewal = self.spawn_lease_renewal(
            job.clone(),
            token.clone(),
            Arc::clone(progress),
            Arc::clone(&lease_lost),
        );

        let completion = tokio::select! {
            biased;
            result = worker.execute(&ctx, job, &handle) => Completion::Finished(result),
            _ = time::sleep(self.config.max_job_runtime) => {
                token.cancel();
                Completion::TimedOut
            }
            _ = token.cancelled() => Completion::Finished(Err(WorkerError::Canceled)),
        };
        renewal.abort();

        match completion {
            Completion::Finished(Err(e)) if e.is_canceled() => {
                if lease_lost.load(Ordering::SeqCst) {
                    Completion::LeaseLost
                } else {
                    Completion::Shutdown
                }
            }
            other => other,
        }
    }

    /// Renews the lease every renewal interval and flushes progress with it.
    ///
    /// Cancels the job's token when the lease turns out to be held by
    /// someone else.
    fn spawn_lease_renewal(
        &self,
        job: Job,
        token: CancellationToken,
        progress: Arc<ProgressRecorder>,
        lease_lost: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let interval = self.config.lease_renewal_interval;
        let lease = self.config.lease_duration;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await;
            let mut current = job;

            let lose = |current: &Job| {
                warn!("Lease on job {} lost, cancelling worker", current.key());
                lease_lost.store(true, Ordering::SeqCst);
                token.cancel();
            };

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                match store.renew_lease(&current, lease).await {
                    Ok(renewed) => current = renewed,
                    Err(StoreError::LeaseLost(_)) => {
                        lose(&current);
                        return;
                    }
                    Err(e) => {
                        warn!("Failed to renew lease on job {}: {}", current.key(), e);
                        continue;
                    }
                }

                let snapshot = progress.snapshot();
                match store
                    .update_status(&current, &move |status: &mut JobStatus| {
                        status.message = snapshot.message.clone();
                        status.progress = snapshot.progress;
                        status.summary = snapshot.summary.clone();
                    })
                    .await
                {
                    Ok(updated) => current = updated,
                    Err(StoreError::LeaseLost(_)) => {
                        lose(&current);
                        return;
                    }
                    Err(e) => debug!("Failed to flush progress of job {}: {}", current.key(), e),
                }
            }
        })
    }

    async fn complete(
        &self,
        job: Job,
        completion: Completion,
        progress: &ProgressRecorder,
        started: Instant,
    ) {
        let key = job.key();
        let outcome = match completion {
            Completion::Shutdown => {
                info!("Abandoning job {} on shutdown; its lease will expire", key);
                return;
            }
            Completion::LeaseLost => JobOutcome::expired("lease lost to another driver"),
            Completion::TimedOut => {
                warn!("Job {} exceeded maximum runtime", key);
                JobOutcome::failed(format!(
                    "job exceeded maximum runtime of {}s",
                    self.config.max_job_runtime.as_secs()
                ))
                .with_summary(progress.summary())
            }
            Completion::Finished(Ok(summary)) => {
                let message = if summary.errors > 0 {
                    format!("completed with {} error(s)", summary.errors)
                } else {
                    progress
                        .final_message()
                        .unwrap_or_else(|| "completed".to_string())
                };
                JobOutcome::succeeded(summary).with_message(message)
            }
            Completion::Finished(Err(e)) => {
                warn!("Job {} failed: {}", key, e);
                JobOutcome::failed(e.to_string()).with_summary(progress.summary())
            }
        };

        let mut outcome = outcome.with_results(progress.results());
        outcome.errors.extend(progress.error_messages());

        let Some(finalized) = self.finalize(&job, &outcome).await else {
            return;
        };
        info!(
            "Job {} finished as {} in {:?}",
            key,
            finalized.status.phase,
            started.elapsed()
        );

        self.archive(&finalized).await;
    }

    async fn finalize(&self, job: &Job, outcome: &JobOutcome) -> Option<Job> {
        let key = job.key();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.finalize(job, outcome).await {
                Ok(finalized) => return Some(finalized),
                Err(StoreError::LeaseLost(_)) => {
                    warn!("Not finalizing job {}: held by another driver", key);
                    return None;
                }
                Err(e) if attempt < FINALIZE_ATTEMPTS => {
                    warn!(
                        "Failed to finalize job {} (attempt {}/{}): {}",
                        key, attempt, FINALIZE_ATTEMPTS, e
                    );
                    time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!(
                        "Giving up finalizing job {} after {} attempts: {}",
                        key, attempt, e
                    );
                    return None;
                }
            }
        }
    }

    /// Writes the HistoricJob, then removes the live job
    async fn archive(&self, job: &Job) {
        if let Err(e) = self.history.write(job).await {
            warn!("Failed to archive job {}: {}", job.key(), e);
            return;
        }
        if let Err(e) = self.store.remove(job).await {
            warn!("Failed to remove archived job {}: {}", job.key(), e);
        }
    }

    async fn cleanup_loop(&self, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.config.cleanup_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.cleanup_once().await;
        }
    }

    /// Requeues stale jobs and archives terminal leftovers
    async fn cleanup_once(&self) {
        match self
            .store
            .list_stale(self.config.lease_renewal_interval)
            .await
        {
            Ok(stale) => {
                let mut requeued = 0;
                for job in stale {
                    match self.store.requeue(&job).await {
                        Ok(job) if job.status.phase == JobPhase::Pending => requeued += 1,
                        Ok(_) => {}
                        Err(e) => warn!("Failed to requeue job {}: {}", job.key(), e),
                    }
                }
                if requeued > 0 {
                    info!("Requeued {} stale job(s)", requeued);
                }
            }
            Err(e) => warn!("Failed to list stale jobs: {}", e),
        }

        match self.store.list_terminal().await {
            Ok(terminal) => {
                for job in terminal {
                    debug!("Archiving leftover terminal job {}", job.key());
                    self.archive(&job).await;
                }
            }
            Err(e) => warn!("Failed to list terminal jobs: {}", e),
        }
    }
}
