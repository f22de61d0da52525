use tracing::debug;

use super::{Backend, BackendError, StageOptions, StagedBackend};

/// Write target for a worker: the backend itself or a staging area on it
pub enum Stage<'a> {
    Direct(&'a dyn Backend),
    Staged(Box<dyn StagedBackend>),
}

impl<'a> Stage<'a> {
    pub async fn open(backend: &'a dyn Backend, options: &StageOptions) -> Result<Self, BackendError> {
        let staged = tokio::time::timeout(options.timeout, backend.stage(options))
            .await
            .map_err(|_| BackendError::Other("timed out opening staging area".to_string()))??;

        Ok(match staged {
            Some(staged) => {
                debug!("Opened staging area ({:?})", options.mode);
                Stage::Staged(staged)
            }
            None => Stage::Direct(backend),
        })
    }

    pub fn writer(&self) -> &dyn Backend {
        match self {
            Stage::Direct(backend) => *backend,
            Stage::Staged(staged) => staged.writer(),
        }
    }

    /// Publishes staged writes. Dropping a stage without finishing discards them.
    pub async fn finish(self) -> Result<(), BackendError> {
        match self {
            Stage::Direct(_) => Ok(()),
            Stage::Staged(staged) => staged.push().await,
        }
    }
}
