//! Job DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ObjectMeta;
use crate::domain::job::{Job, JobSpec};

/// Request to create a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub namespace: String,
    /// Generated from the action when omitted
    pub name: Option<String>,
    pub spec: JobSpec,
}

impl CreateJob {
    pub fn into_job(self) -> Job {
        let name = self.name.unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{}-{}", self.spec.action, &suffix[..8])
        });
        Job::new(ObjectMeta::new(self.namespace, name), self.spec)
    }
}
