//! Connection domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::meta::{ObjectMeta, Resource};

/// Configuration needed to reach an external system, plus its health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub metadata: ObjectMeta,
    pub spec: ConnectionSpec,
    #[serde(default)]
    pub status: ConnectionStatus,
}

impl Resource for Connection {
    const KIND: &'static str = "Connection";
    const PLURAL: &'static str = "connections";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    #[serde(default)]
    pub title: Option<String>,

    /// Endpoint requested by the health check
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub reachable: bool,

    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error: Option<String>,
}
