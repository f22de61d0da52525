//! Progress recorder
//!
//! Collects per-resource results while a worker runs. The driver snapshots
//! it on every lease renewal and writes the snapshot into the job status.

use provisioner_core::domain::job::{FileAction, JobSummary, ResourceResult};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::WorkerError;

/// Errors tolerated before a worker aborts, unless overridden
pub const DEFAULT_MAX_ERRORS: usize = 20;

#[derive(Debug)]
struct ProgressState {
    total: usize,
    processed: usize,
    message: Option<String>,
    final_message: Option<String>,
    max_errors: usize,
    /// Counters for the current stage
    summary: JobSummary,
    /// Every result recorded across all stages
    results: Vec<ResourceResult>,
}

/// Point-in-time view of a running job
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub message: Option<String>,
    pub progress: f64,
    pub summary: JobSummary,
}

#[derive(Debug)]
pub struct ProgressRecorder {
    state: Mutex<ProgressState>,
}

impl Default for ProgressRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState {
                total: 0,
                processed: 0,
                message: None,
                final_message: None,
                max_errors: DEFAULT_MAX_ERRORS,
                summary: JobSummary::default(),
                results: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_total(&self, total: usize) {
        self.state().total = total;
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.state().message = Some(message.into());
    }

    /// Message reported when the job finishes, overriding the running message
    pub fn set_final_message(&self, message: impl Into<String>) {
        self.state().final_message = Some(message.into());
    }

    pub fn strict_max_errors(&self, max: usize) {
        self.state().max_errors = max;
    }

    pub fn record(&self, result: ResourceResult) {
        let mut state = self.state();
        state.processed += 1;
        if result.error.is_some() {
            state.summary.errors += 1;
        } else {
            match result.action {
                FileAction::Created => state.summary.created += 1,
                FileAction::Updated | FileAction::Moved => state.summary.updated += 1,
                FileAction::Deleted => state.summary.deleted += 1,
                FileAction::Ignored => state.summary.unchanged += 1,
            }
        }
        state.results.push(result);
    }

    /// Counts resources found identical without producing a result entry
    pub fn record_unchanged(&self, count: usize) {
        self.state().summary.unchanged += count;
    }

    pub fn add_warning(&self, warning: impl Into<String>) {
        self.state().summary.warnings.push(warning.into());
    }

    /// Fails once the current stage has hit its error budget
    pub fn too_many_errors(&self) -> Result<(), WorkerError> {
        let state = self.state();
        if state.summary.errors >= state.max_errors {
            return Err(WorkerError::TooManyErrors(state.summary.errors));
        }
        Ok(())
    }

    /// Starts a new stage: counters and the error budget reset, the result
    /// log is kept.
    pub fn reset_results(&self) {
        let mut state = self.state();
        state.total = 0;
        state.processed = 0;
        state.summary = JobSummary::default();
        state.max_errors = DEFAULT_MAX_ERRORS;
    }

    /// Counters of the current stage
    pub fn summary(&self) -> JobSummary {
        self.state().summary.clone()
    }

    pub fn results(&self) -> Vec<ResourceResult> {
        self.state().results.clone()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.state()
            .results
            .iter()
            .filter_map(|r| r.error.clone())
            .collect()
    }

    pub fn final_message(&self) -> Option<String> {
        self.state().final_message.clone()
    }

    pub fn message(&self) -> Option<String> {
        let state = self.state();
        state.final_message.clone().or_else(|| state.message.clone())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state();
        let progress = if state.total == 0 {
            0.0
        } else {
            (state.processed.min(state.total) as f64 / state.total as f64) * 100.0
        };
        ProgressSnapshot {
            message: state.message.clone(),
            progress,
            summary: state.summary.clone(),
        }
    }
}
