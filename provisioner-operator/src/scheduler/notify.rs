//! Wake-up channel between the job controller and the driver

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Creates a notifier and the receiving end the driver listens on
pub fn channel(buffer: usize) -> (JobNotifier, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(buffer);
    (JobNotifier { tx }, rx)
}

/// Non-blocking sender of "work available" hints. Hints are dropped when
/// the buffer is full; the driver's poll interval covers the loss.
#[derive(Debug, Clone)]
pub struct JobNotifier {
    tx: mpsc::Sender<()>,
}

impl JobNotifier {
    /// Returns whether the hint was queued
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("Notification buffer full, dropping hint");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}
