//! History job controller
//!
//! Deletes HistoricJobs once they are older than the configured expiration.
//! Ages are checked on every event, so the informer's resync doubles as the
//! cleanup schedule.

use chrono::Duration;
use provisioner_core::domain::Resource;
use provisioner_core::domain::history::HistoricJob;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::informer::WatchEvent;
use crate::clock::Clock;
use crate::store::{ResourceStore, StoreError, StoreResult};

pub struct HistoryJobController {
    store: Arc<dyn ResourceStore<HistoricJob>>,
    expiration: Duration,
    clock: Arc<dyn Clock>,
}

impl HistoryJobController {
    pub fn new(
        store: Arc<dyn ResourceStore<HistoricJob>>,
        expiration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            expiration,
            clock,
        }
    }

    /// Deletes the record if it has expired; returns whether it was deleted
    pub async fn handle(&self, event: &WatchEvent<HistoricJob>) -> StoreResult<bool> {
        let record = match event {
            WatchEvent::Added(record) | WatchEvent::Updated { new: record, .. } => record,
            WatchEvent::Deleted(_) => return Ok(false),
        };

        if record.age(self.clock.now()) <= self.expiration {
            return Ok(false);
        }

        let meta = record.metadata();
        match self.store.delete(&meta.namespace, &meta.name).await {
            Ok(()) => {
                debug!("Deleted expired historic job {}", record.key());
                Ok(true)
            }
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn run(
        self,
        mut events: mpsc::Receiver<WatchEvent<HistoricJob>>,
        shutdown: CancellationToken,
    ) {
        info!(
            "Starting history job controller (expiration: {}s)",
            self.expiration.num_seconds()
        );
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let Err(e) = self.handle(&event).await {
                warn!(
                    "Failed to clean up historic job {}: {}",
                    event.object().key(),
                    e
                );
            }
        }
        debug!("History job controller stopped");
    }
}
