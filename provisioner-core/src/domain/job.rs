//! Job domain types
//!
//! A Job is the durable record of one asynchronous provisioning operation.
//! It is created by an external actor (or another worker), mutated by the
//! driver holding its lease, and becomes immutable once terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::{ObjectMeta, Resource};

/// Provisioning job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    pub fn new(metadata: ObjectMeta, spec: JobSpec) -> Self {
        Self {
            metadata,
            spec,
            status: JobStatus::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.phase.is_terminal()
    }

    /// True when the job carries a lease that has not expired at `now`
    pub fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.status
            .lease
            .as_ref()
            .is_some_and(|lease| !lease.is_expired(now))
    }

    /// True when the job is claimed or running but its lease has expired
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status.phase, JobPhase::Claimed | JobPhase::Running)
            && !self.has_live_lease(now)
    }

    /// Pending jobs and jobs with an abandoned lease may be claimed
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status.phase {
            JobPhase::Pending => !self.has_live_lease(now),
            JobPhase::Claimed | JobPhase::Running => self.is_stale(now),
            _ => false,
        }
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.status
            .lease
            .as_ref()
            .is_some_and(|lease| lease.holder == holder)
    }
}

impl Resource for Job {
    const KIND: &'static str = "Job";
    const PLURAL: &'static str = "jobs";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// The operation a job requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    /// Sync the managed namespace from the backend
    #[serde(alias = "sync")]
    Pull,
    /// Export the managed namespace to the backend
    #[serde(alias = "export")]
    Push,
    Migrate,
    Delete,
    Move,
}

impl JobAction {
    pub const ALL: [JobAction; 5] = [
        JobAction::Pull,
        JobAction::Push,
        JobAction::Migrate,
        JobAction::Delete,
        JobAction::Move,
    ];
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::Pull => write!(f, "pull"),
            JobAction::Push => write!(f, "push"),
            JobAction::Migrate => write!(f, "migrate"),
            JobAction::Delete => write!(f, "delete"),
            JobAction::Move => write!(f, "move"),
        }
    }
}

impl std::str::FromStr for JobAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pull" | "sync" => Ok(JobAction::Pull),
            "push" | "export" => Ok(JobAction::Push),
            "migrate" => Ok(JobAction::Migrate),
            "delete" => Ok(JobAction::Delete),
            "move" => Ok(JobAction::Move),
            other => Err(format!("unknown job action '{}'", other)),
        }
    }
}

/// What the job should do and against which repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub action: JobAction,

    /// Name of the target repository (same namespace as the job)
    pub repository: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<SyncJobOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<ExportJobOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate: Option<MigrateJobOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<DeleteJobOptions>,

    #[serde(
        default,
        rename = "move",
        skip_serializing_if = "Option::is_none"
    )]
    pub move_files: Option<MoveJobOptions>,
}

impl JobSpec {
    /// A spec with no action-specific options
    pub fn new(action: JobAction, repository: impl Into<String>) -> Self {
        Self {
            action,
            repository: repository.into(),
            pull: None,
            push: None,
            migrate: None,
            delete: None,
            move_files: None,
        }
    }

    pub fn pull(repository: impl Into<String>, incremental: bool) -> Self {
        Self {
            pull: Some(SyncJobOptions { incremental }),
            ..Self::new(JobAction::Pull, repository)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJobOptions {
    /// Request an incremental sync; the comparator may still fall back to full
    #[serde(default)]
    pub incremental: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobOptions {
    /// Directory prefix inside the repository
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateJobOptions {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteJobOptions {
    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveJobOptions {
    #[serde(default)]
    pub paths: Vec<String>,

    /// Destination directory, e.g. "archive/"
    pub target_path: String,

    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

/// Job lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    #[default]
    Pending,
    Claimed,
    Running,
    Succeeded,
    Failed,
    Expired,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Succeeded | JobPhase::Failed | JobPhase::Expired
        )
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Pending => "Pending",
            JobPhase::Claimed => "Claimed",
            JobPhase::Running => "Running",
            JobPhase::Succeeded => "Succeeded",
            JobPhase::Failed => "Failed",
            JobPhase::Expired => "Expired",
        };
        write!(f, "{}", s)
    }
}

/// Exclusive execution right over a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Observed state of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub phase: JobPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,

    #[serde(default)]
    pub message: Option<String>,

    /// Percent complete, 0-100
    #[serde(default)]
    pub progress: f64,

    #[serde(default)]
    pub summary: JobSummary,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResourceResult>,

    #[serde(default)]
    pub started: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
}

/// Per-job resource counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub errors: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl JobSummary {
    /// Adds another stage's counters into this one
    pub fn merge(&mut self, other: &JobSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
        self.errors += other.errors;
        self.warnings.extend(other.warnings.iter().cloned());
    }

    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// What happened to one file or resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAction {
    Created,
    Updated,
    Deleted,
    Moved,
    Ignored,
}

/// One entry of a job's outcome log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResult {
    pub action: FileAction,
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ResourceResult {
    pub fn new(action: FileAction, path: impl Into<String>) -> Self {
        Self {
            action,
            path: path.into(),
            name: None,
            kind: None,
            error: None,
        }
    }

    pub fn with_resource(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self.name = Some(name.into());
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Terminal result handed to the job store when a job finalizes
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub phase: JobPhase,
    pub message: Option<String>,
    pub summary: JobSummary,
    pub errors: Vec<String>,
    pub results: Vec<ResourceResult>,
}

impl JobOutcome {
    pub fn succeeded(summary: JobSummary) -> Self {
        Self {
            phase: JobPhase::Succeeded,
            message: None,
            summary,
            errors: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            phase: JobPhase::Failed,
            errors: vec![message.clone()],
            message: Some(message),
            summary: JobSummary::default(),
            results: Vec::new(),
        }
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self {
            phase: JobPhase::Expired,
            message: Some(message.into()),
            summary: JobSummary::default(),
            errors: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_summary(mut self, summary: JobSummary) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_results(mut self, results: Vec<ResourceResult>) -> Self {
        self.results = results;
        self
    }
}
