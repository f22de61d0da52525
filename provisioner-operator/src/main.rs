//! Provisioner Operator
//!
//! Runs provisioning jobs that keep namespaces in sync with the repositories
//! bound to them.
//!
//! Architecture:
//! - Configuration: Load settings from environment, validated at startup
//! - Store: Job queue with lease-based claims on top of the resource API
//! - Scheduler: Concurrent job driver woken by the job controller
//! - Workers: Sync, export, migrate, delete and move jobs
//! - Controllers: Repository, connection and history reconcilers
//!
//! Every driver instance can run next to others; leases on the job records
//! make sure each job is executed by one driver at a time.

mod api;
mod backend;
mod clock;
mod config;
mod controllers;
mod resources;
mod scheduler;
mod store;
mod workers;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use provisioner_client::ResourceClient;
use provisioner_core::domain::connection::Connection;
use provisioner_core::domain::history::HistoricJob;
use provisioner_core::domain::job::Job;
use provisioner_core::domain::repository::Repository;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::clock::{Clock, SystemClock, to_chrono};
use crate::config::Config;
use crate::controllers::{
    ConnectionController, HistoryJobController, HttpConnectionTester, JobController,
    PollingInformer, RepositoryController,
};
use crate::resources::{ClientFactory, DefaultClientFactory};
use crate::scheduler::{JobDriver, notify};
use crate::store::{ApiStore, HistoryWriter, PersistentJobStore, ResourceStore};
use crate::workers::WorkerRegistry;

/// Events buffered between an informer and its controller
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "provisioner_operator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Provisioner Operator");

    let config = load_config()?;
    info!(
        "Loaded configuration: driver_id={}, api_url={}, namespace={}",
        config.driver_id, config.api_url, config.namespace
    );

    let client = ResourceClient::new(config.api_url.clone());
    info!("Waiting for resource API");
    connect_with_retry(&client).await?;
    info!("Resource API reachable");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let namespace = config.namespace.clone();

    // Stores
    let jobs: Arc<dyn ResourceStore<Job>> =
        Arc::new(ApiStore::<Job>::new(client.clone(), namespace.clone()));
    let history: Arc<dyn ResourceStore<HistoricJob>> =
        Arc::new(ApiStore::<HistoricJob>::new(client.clone(), namespace.clone()));
    let repositories: Arc<dyn ResourceStore<Repository>> =
        Arc::new(ApiStore::<Repository>::new(client.clone(), namespace.clone()));
    let connections: Arc<dyn ResourceStore<Connection>> =
        Arc::new(ApiStore::<Connection>::new(client.clone(), namespace.clone()));
    let job_store = Arc::new(PersistentJobStore::new(jobs.clone(), clock.clone()));
    let factory: Arc<dyn ClientFactory> = Arc::new(DefaultClientFactory::new(client.clone()));

    info!("Stores initialized");

    let mut tasks = JoinSet::new();

    // Job driver
    let (notifier, notifications) = notify::channel(config.notification_buffer);
    let driver = Arc::new(JobDriver::new(
        config.driver(),
        job_store.clone(),
        repositories.clone(),
        factory.clone(),
        WorkerRegistry::standard(repositories.clone(), clock.clone()),
        HistoryWriter::new(history.clone()),
        clock.clone(),
        notifications,
    ));
    tasks.spawn(driver.run(shutdown.clone()));

    // Job controller
    let mut job_informer = PollingInformer::new(jobs, config.job_watch_interval);
    let job_events = job_informer.subscribe(EVENT_BUFFER);
    tasks.spawn(job_informer.run(shutdown.clone()));
    tasks.spawn(JobController::new(notifier).run(job_events, shutdown.clone()));

    // Repository controller
    let mut repository_informer =
        PollingInformer::new(repositories.clone(), config.resync_interval);
    let repository_events = repository_informer.subscribe(EVENT_BUFFER);
    tasks.spawn(repository_informer.run(shutdown.clone()));
    let repository_controller = Arc::new(RepositoryController::new(
        repositories,
        job_store,
        factory,
        clock.clone(),
    ));
    tasks.spawn(repository_controller.run(repository_events, shutdown.clone()));

    // Connection controller
    let mut connection_informer =
        PollingInformer::new(connections.clone(), config.resync_interval);
    let connection_events = connection_informer.subscribe(EVENT_BUFFER);
    tasks.spawn(connection_informer.run(shutdown.clone()));
    let connection_controller = ConnectionController::new(
        connections,
        Arc::new(HttpConnectionTester::default()),
        clock.clone(),
    );
    tasks.spawn(connection_controller.run(connection_events, shutdown.clone()));

    // History job controller
    let mut history_informer = PollingInformer::new(history.clone(), config.resync_interval);
    let history_events = history_informer.subscribe(EVENT_BUFFER);
    tasks.spawn(history_informer.run(shutdown.clone()));
    let history_controller =
        HistoryJobController::new(history, to_chrono(config.history_expiration), clock);
    tasks.spawn(history_controller.run(history_events, shutdown.clone()));

    info!("Operator initialized successfully");
    info!(
        "Poll interval: {:?}, lease duration: {:?}, renewal interval: {:?}",
        config.poll_interval, config.lease_duration, config.lease_renewal_interval
    );

    // Health endpoint
    let app = api::create_router();
    info!("Health endpoint listening on {}", config.health_bind_addr);
    let listener = tokio::net::TcpListener::bind(config.health_bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.health_bind_addr))?;

    let token = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;
    if let Err(e) = server {
        error!("Health server error: {}", e);
        shutdown.cancel();
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!("Operator task panicked: {}", e);
        }
    }

    info!("Provisioner Operator stopped");
    Ok(())
}

/// Loads and validates configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Waits for the resource API with exponential backoff
///
/// The API server may still be starting when the operator comes up
/// (common in container environments).
async fn connect_with_retry(client: &ResourceClient) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client.ping().await {
            Ok(()) => {
                if attempt > 1 {
                    info!("Reached resource API after {} attempt(s)", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Resource API unreachable after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!(
                        "Failed to reach resource API at {}: {}",
                        client.base_url(),
                        e
                    ));
                }

                warn!(
                    "Resource API not reachable (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

/// Cancels the root token on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, stopping operator");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
}
