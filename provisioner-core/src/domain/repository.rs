//! Repository domain types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::meta::{ObjectMeta, Resource};

/// Shortest period between two scheduled pulls
pub const MIN_SYNC_INTERVAL_SECONDS: u64 = 10;

/// Period used when sync is enabled without an interval
pub const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 60;

/// An external version-controlled storage backend bound to a namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub metadata: ObjectMeta,
    pub spec: RepositorySpec,
    #[serde(default)]
    pub status: RepositoryStatus,
}

impl Repository {
    /// True while the controller has not observed the current spec
    pub fn needs_reconcile(&self) -> bool {
        self.status.observed_generation < self.metadata.generation
    }

    /// Whether a scheduled pull is due at `now`.
    ///
    /// A repository that never finished a sync is due right away.
    pub fn sync_due(&self, now: DateTime<Utc>) -> bool {
        if !self.spec.sync.enabled {
            return false;
        }
        match self.status.sync.finished {
            Some(finished) => finished + self.spec.sync.interval() <= now,
            None => true,
        }
    }
}

impl Resource for Repository {
    const KIND: &'static str = "Repository";
    const PLURAL: &'static str = "repositories";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub title: String,

    pub backend: BackendSpec,

    /// Namespace whose resources this repository manages
    pub target_namespace: String,

    #[serde(default)]
    pub sync: SyncOptions,
}

/// Backend type and connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendSpec {
    Local {
        path: String,
    },
    Git {
        url: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
    #[serde(rename = "github")]
    GitHub {
        url: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
}

impl BackendSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendSpec::Local { .. } => "local",
            BackendSpec::Git { .. } => "git",
            BackendSpec::GitHub { .. } => "github",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub interval_seconds: Option<u64>,
}

impl SyncOptions {
    /// Configured interval, raised to the minimum
    pub fn interval(&self) -> Duration {
        let seconds = self
            .interval_seconds
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECONDS)
            .max(MIN_SYNC_INTERVAL_SECONDS);
        i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub health: HealthStatus,

    #[serde(default)]
    pub sync: SyncStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    #[serde(default)]
    pub healthy: bool,

    #[serde(default)]
    pub checked: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    #[default]
    Unknown,
    Working,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(default)]
    pub state: SyncState,

    /// Name of the job that last synced this repository
    #[serde(default)]
    pub job: Option<String>,

    /// Backend revision the namespace was last synced to
    #[serde(default)]
    pub last_ref: Option<String>,

    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_spec_tagging() {
        let spec: BackendSpec =
            serde_json::from_str(r#"{"type":"local","path":"/srv/repo"}"#).unwrap();
        assert_eq!(
            spec,
            BackendSpec::Local {
                path: "/srv/repo".to_string()
            }
        );
        assert_eq!(spec.type_name(), "local");

        let spec: BackendSpec =
            serde_json::from_str(r#"{"type":"github","url":"https://example.com/r"}"#).unwrap();
        assert_eq!(spec.type_name(), "github");
    }

    fn sample(sync: SyncOptions) -> Repository {
        Repository {
            metadata: ObjectMeta::new("default", "repo"),
            spec: RepositorySpec {
                title: "Repo".to_string(),
                backend: BackendSpec::Local {
                    path: "/tmp".to_string(),
                },
                target_namespace: "default".to_string(),
                sync,
            },
            status: RepositoryStatus::default(),
        }
    }

    #[test]
    fn test_sync_interval_is_clamped() {
        let interval = |seconds| SyncOptions {
            enabled: true,
            interval_seconds: seconds,
        }
        .interval();
        assert_eq!(interval(Some(1)), Duration::seconds(10));
        assert_eq!(interval(Some(0)), Duration::seconds(10));
        assert_eq!(interval(Some(300)), Duration::seconds(300));
        assert_eq!(interval(None), Duration::seconds(60));
    }

    #[test]
    fn test_sync_due() {
        let now = Utc::now();
        let mut repo = sample(SyncOptions {
            enabled: true,
            interval_seconds: Some(30),
        });
        assert!(repo.sync_due(now));

        repo.status.sync.finished = Some(now - Duration::seconds(29));
        assert!(!repo.sync_due(now));
        repo.status.sync.finished = Some(now - Duration::seconds(30));
        assert!(repo.sync_due(now));

        repo.spec.sync.enabled = false;
        assert!(!repo.sync_due(now));
    }

    #[test]
    fn test_needs_reconcile() {
        let mut repo = Repository {
            metadata: ObjectMeta::new("default", "repo"),
            spec: RepositorySpec {
                title: "Repo".to_string(),
                backend: BackendSpec::Local {
                    path: "/tmp".to_string(),
                },
                target_namespace: "default".to_string(),
                sync: SyncOptions::default(),
            },
            status: RepositoryStatus::default(),
        };
        repo.metadata.generation = 3;
        repo.status.observed_generation = 2;
        assert!(repo.needs_reconcile());
        repo.status.observed_generation = 3;
        assert!(!repo.needs_reconcile());
    }
}
