//! Object metadata shared by every resource kind

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identity and concurrency metadata of a stored resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,

    /// Assigned by the store on create
    #[serde(default)]
    pub uid: Uuid,

    /// Bumped by the owner whenever the spec changes
    #[serde(default)]
    pub generation: i64,

    /// Optimistic concurrency token, bumped on every successful write
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation: 1,
            ..Default::default()
        }
    }

    /// `namespace/name`, the key used by queues and listers
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A typed resource served by the declarative resource API
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind name, e.g. "Job"
    const KIND: &'static str;

    /// Plural path segment, e.g. "jobs"
    const PLURAL: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> String {
        self.metadata().key()
    }
}

/// Splits a `namespace/name` key
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
}
