//! Resources living in a repository's managed namespace

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kind assumed for files that do not declare one
pub const DEFAULT_KIND: &str = "Dashboard";

/// A resource in the managed namespace, with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    pub kind: String,
    pub name: String,

    /// File in the repository this resource was read from or exported to
    #[serde(default)]
    pub source_path: Option<String>,

    /// Repository that owns this resource, if any
    #[serde(default)]
    pub manager: Option<String>,

    pub body: JsonValue,
}

impl ManagedResource {
    /// Builds a resource from a repository file.
    ///
    /// Kind comes from the document's `kind` field and name from
    /// `metadata.name`, falling back to the file stem.
    pub fn from_file(path: &str, body: JsonValue, manager: &str) -> Self {
        let kind = body
            .get("kind")
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_KIND)
            .to_string();
        let name = body
            .pointer("/metadata/name")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| file_stem(path).to_string());

        Self {
            kind,
            name,
            source_path: Some(path.to_string()),
            manager: Some(manager.to_string()),
            body,
        }
    }

    pub fn is_managed_by(&self, repository: &str) -> bool {
        self.manager.as_deref() == Some(repository)
    }

    /// Unowned resources and resources owned by `repository`
    pub fn is_available_to(&self, repository: &str) -> bool {
        self.manager.is_none() || self.is_managed_by(repository)
    }

    /// Path used when writing this resource into a repository
    pub fn export_path(&self, prefix: Option<&str>) -> String {
        if let Some(path) = &self.source_path {
            return path.clone();
        }
        let dir = format!("{}s", self.kind.to_ascii_lowercase());
        match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}/{}/{}.json", prefix, dir, self.name),
            None => format!("{}/{}.json", dir, self.name),
        }
    }
}

fn file_stem(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.strip_suffix(".json").unwrap_or(file)
}
