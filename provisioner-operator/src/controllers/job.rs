//! Job controller
//!
//! Turns job watch events into driver wake-ups.

use provisioner_core::domain::Resource;
use provisioner_core::domain::job::{Job, JobPhase};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::informer::WatchEvent;
use crate::scheduler::JobNotifier;

pub struct JobController {
    notifier: JobNotifier,
}

impl JobController {
    pub fn new(notifier: JobNotifier) -> Self {
        Self { notifier }
    }

    /// Notifies the driver about new or changed pending jobs.
    ///
    /// Returns whether a wake-up was sent.
    pub fn handle(&self, event: &WatchEvent<Job>) -> bool {
        let wake = match event {
            WatchEvent::Added(job) => job.status.phase == JobPhase::Pending,
            WatchEvent::Updated { old, new } => {
                new.status.phase == JobPhase::Pending
                    && old.metadata.resource_version != new.metadata.resource_version
            }
            WatchEvent::Deleted(_) => false,
        };

        if wake {
            debug!("Pending job {} observed", event.object().key());
            self.notifier.notify()
        } else {
            false
        }
    }

    pub async fn run(self, mut events: mpsc::Receiver<WatchEvent<Job>>, shutdown: CancellationToken) {
        info!("Starting job controller");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle(&event);
                    }
                    None => break,
                },
            }
        }
        debug!("Job controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::notify;
    use crate::testing::job_fixture;
    use provisioner_core::domain::job::JobAction;

    #[test]
    fn test_pending_jobs_wake_driver() {
        let (notifier, mut rx) = notify::channel(8);
        let controller = JobController::new(notifier);

        let job = job_fixture("default", "pull-1", JobAction::Pull, "repo");
        assert!(controller.handle(&WatchEvent::Added(job.clone())));
        assert!(rx.try_recv().is_ok());

        let mut requeued = job.clone();
        requeued.metadata.resource_version += 1;
        assert!(controller.handle(&WatchEvent::Updated {
            old: job.clone(),
            new: requeued,
        }));
    }

    #[test]
    fn test_resync_and_running_jobs_are_ignored() {
        let (notifier, mut rx) = notify::channel(8);
        let controller = JobController::new(notifier);

        let job = job_fixture("default", "pull-1", JobAction::Pull, "repo");
        assert!(!controller.handle(&WatchEvent::Updated {
            old: job.clone(),
            new: job.clone(),
        }));

        let mut running = job.clone();
        running.status.phase = JobPhase::Running;
        assert!(!controller.handle(&WatchEvent::Added(running)));
        assert!(!controller.handle(&WatchEvent::Deleted(job)));
        assert!(rx.try_recv().is_err());
    }
}
