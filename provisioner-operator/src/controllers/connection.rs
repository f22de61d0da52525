//! Connection controller
//!
//! Probes every connection on each resync and records whether it is
//! reachable. Probe failures are part of the status, not errors; failed
//! status patches are logged and picked up again on the next resync.

use async_trait::async_trait;
use provisioner_core::domain::Resource;
use provisioner_core::domain::connection::Connection;
use provisioner_core::domain::patch::PatchOperation;
use reqwest::Client;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::informer::WatchEvent;
use crate::clock::Clock;
use crate::store::ResourceStore;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Checks whether an external system is reachable
#[async_trait]
pub trait ConnectionTester: Send + Sync {
    async fn test(&self, connection: &Connection) -> Result<(), ProbeError>;
}

/// Probes the connection URL with a GET request
#[derive(Debug, Clone, Default)]
pub struct HttpConnectionTester {
    client: Client,
}

#[async_trait]
impl ConnectionTester for HttpConnectionTester {
    async fn test(&self, connection: &Connection) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&connection.spec.url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        Ok(())
    }
}

pub struct ConnectionController {
    store: Arc<dyn ResourceStore<Connection>>,
    tester: Arc<dyn ConnectionTester>,
    clock: Arc<dyn Clock>,
}

impl ConnectionController {
    pub fn new(
        store: Arc<dyn ResourceStore<Connection>>,
        tester: Arc<dyn ConnectionTester>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            tester,
            clock,
        }
    }

    pub async fn run(
        self,
        mut events: mpsc::Receiver<WatchEvent<Connection>>,
        shutdown: CancellationToken,
    ) {
        info!("Starting connection controller");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                WatchEvent::Added(connection) | WatchEvent::Updated { new: connection, .. } => {
                    self.reconcile(&connection).await;
                }
                WatchEvent::Deleted(_) => {}
            }
        }
        debug!("Connection controller stopped");
    }

    pub async fn reconcile(&self, connection: &Connection) {
        let key = connection.key();
        let error = match self.tester.test(connection).await {
            Ok(()) => None,
            Err(e) => {
                debug!("Connection {} is unreachable: {}", key, e);
                Some(e.to_string())
            }
        };

        let ops = [
            PatchOperation::replace("/status/reachable", error.is_none()),
            PatchOperation::replace("/status/lastChecked", json!(self.clock.now())),
            PatchOperation::replace(
                "/status/error",
                error.map_or(JsonValue::Null, JsonValue::String),
            ),
            PatchOperation::replace(
                "/status/observedGeneration",
                connection.metadata.generation,
            ),
        ];

        let meta = connection.metadata();
        if let Err(e) = self
            .store
            .patch_status(&meta.namespace, &meta.name, &ops)
            .await
        {
            warn!("Failed to update status of connection {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MemoryStore};
    use provisioner_core::domain::ObjectMeta;
    use provisioner_core::domain::connection::{ConnectionSpec, ConnectionStatus};

    struct FixedTester {
        status: Option<u16>,
    }

    #[async_trait]
    impl ConnectionTester for FixedTester {
        async fn test(&self, _connection: &Connection) -> Result<(), ProbeError> {
            match self.status {
                Some(code) => Err(ProbeError::Status(code)),
                None => Ok(()),
            }
        }
    }

    fn connection(name: &str) -> Connection {
        let mut metadata = ObjectMeta::new("default", name);
        metadata.generation = 2;
        Connection {
            metadata,
            spec: ConnectionSpec {
                title: None,
                url: "http://grafana.local/api/health".to_string(),
            },
            status: ConnectionStatus::default(),
        }
    }

    #[tokio::test]
    async fn test_reachable_connection() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::<Connection>::new());
        let created = store.create(connection("grafana")).await.unwrap();

        let controller = ConnectionController::new(
            store.clone(),
            Arc::new(FixedTester { status: None }),
            clock.clone(),
        );
        controller.reconcile(&created).await;

        let status = store.snapshot("default", "grafana").unwrap().status;
        assert!(status.reachable);
        assert_eq!(status.error, None);
        assert_eq!(status.last_checked, Some(clock.now()));
        assert_eq!(status.observed_generation, 2);
    }

    #[tokio::test]
    async fn test_unreachable_connection_records_error() {
        let store = Arc::new(MemoryStore::<Connection>::new());
        let created = store.create(connection("grafana")).await.unwrap();

        let controller = ConnectionController::new(
            store.clone(),
            Arc::new(FixedTester { status: Some(503) }),
            Arc::new(ManualClock::new()),
        );
        controller.reconcile(&created).await;

        let status = store.snapshot("default", "grafana").unwrap().status;
        assert!(!status.reachable);
        assert_eq!(status.error.as_deref(), Some("unexpected status 503"));
    }

    #[tokio::test]
    async fn test_patch_failure_is_only_logged() {
        let store = Arc::new(MemoryStore::<Connection>::new());
        let controller = ConnectionController::new(
            store.clone(),
            Arc::new(FixedTester { status: None }),
            Arc::new(ManualClock::new()),
        );

        // Never stored, so the patch fails with NotFound
        controller.reconcile(&connection("missing")).await;
        assert!(store.items().is_empty());
    }
}
