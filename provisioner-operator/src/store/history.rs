//! Append-only archive of terminal jobs

use provisioner_core::domain::Resource;
use provisioner_core::domain::history::HistoricJob;
use provisioner_core::domain::job::Job;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ResourceStore, StoreError, StoreResult};

/// Writes one HistoricJob per terminal job.
///
/// The record name is derived from the job, so a retried write after a
/// partial failure finds the existing record and succeeds.
#[derive(Clone)]
pub struct HistoryWriter {
    store: Arc<dyn ResourceStore<HistoricJob>>,
}

impl HistoryWriter {
    pub fn new(store: Arc<dyn ResourceStore<HistoricJob>>) -> Self {
        Self { store }
    }

    pub async fn write(&self, job: &Job) -> StoreResult<()> {
        let historic = HistoricJob::from_job(job);
        let name = historic.metadata.name.clone();

        match self.store.create(historic).await {
            Ok(_) => {
                info!("Archived job {} as {}", job.key(), name);
                Ok(())
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!("Job {} already archived as {}", job.key(), name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
