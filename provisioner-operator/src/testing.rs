//! In-memory fakes shared by unit tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use provisioner_client::UpsertOutcome;
use provisioner_core::domain::job::{FileAction, Job, JobAction, JobSpec};
use provisioner_core::domain::patch::{PatchOperation, apply_patch};
use provisioner_core::domain::repository::{
    BackendSpec, Repository, RepositorySpec, RepositoryStatus, SyncOptions,
};
use provisioner_core::domain::resource::ManagedResource;
use provisioner_core::domain::{ObjectMeta, Resource};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::backend::{Backend, BackendError, FileChange, StageOptions, StagedBackend};
use crate::clock::Clock;
use crate::resources::{ClientFactory, NamespaceClient, RepositoryHandle, ResourceError};
use crate::store::{ResourceStore, StoreError, StoreResult};

// ============================================================================
// Clock
// ============================================================================

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Resource store
// ============================================================================

/// Resource store with compare-and-swap semantics on `resource_version`
pub struct MemoryStore<T> {
    items: Mutex<BTreeMap<String, T>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<T: Resource> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            clock: None,
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            clock: Some(clock),
        }
    }

    /// Synchronous peek for assertions
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<T> {
        let items = self.items.lock().unwrap();
        items.get(&format!("{}/{}", namespace, name)).cloned()
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.as_ref().map(|c| c.now()).unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl<T: Resource> ResourceStore<T> for MemoryStore<T> {
    async fn create(&self, mut resource: T) -> StoreResult<T> {
        let now = self.now();
        let mut items = self.items.lock().unwrap();
        let key = resource.key();
        if items.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        let meta = resource.metadata_mut();
        if meta.uid.is_nil() {
            meta.uid = Uuid::new_v4();
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(now);
        }
        meta.resource_version = 1;
        items.insert(key, resource.clone());
        Ok(resource)
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<T> {
        self.snapshot(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", namespace, name)))
    }

    async fn list(&self) -> StoreResult<Vec<T>> {
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn update(&self, mut resource: T) -> StoreResult<T> {
        let mut items = self.items.lock().unwrap();
        let key = resource.key();
        let current = items
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if current.metadata().resource_version != resource.metadata().resource_version {
            return Err(StoreError::Conflict(key));
        }

        resource.metadata_mut().resource_version += 1;
        items.insert(key, resource.clone());
        Ok(resource)
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let key = format!("{}/{}", namespace, name);
        match self.items.lock().unwrap().remove(&key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key)),
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        ops: &[PatchOperation],
    ) -> StoreResult<T> {
        let key = format!("{}/{}", namespace, name);
        let mut items = self.items.lock().unwrap();
        let current = items
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let mut document =
            serde_json::to_value(current).map_err(|e| StoreError::Backend(e.to_string()))?;
        apply_patch(&mut document, ops).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut patched: T =
            serde_json::from_value(document).map_err(|e| StoreError::Backend(e.to_string()))?;

        patched.metadata_mut().resource_version += 1;
        items.insert(key, patched.clone());
        Ok(patched)
    }
}

// ============================================================================
// Repository backend
// ============================================================================

#[derive(Default)]
struct MemoryFiles {
    files: BTreeMap<String, JsonValue>,
    revision: u64,
    log: Vec<(u64, FileChange)>,
    pushes: usize,
}

impl MemoryFiles {
    fn record(&mut self, action: FileAction, path: &str, previous_path: Option<&str>) {
        self.revision += 1;
        self.log.push((
            self.revision,
            FileChange {
                action,
                path: path.to_string(),
                previous_path: previous_path.map(str::to_string),
            },
        ));
    }
}

/// Repository files kept in memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryFiles>>,
    staging: bool,
    versioned: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with revisions and a staging area, like a git remote
    pub fn versioned() -> Self {
        Self {
            staging: true,
            versioned: true,
            ..Self::default()
        }
    }

    /// Seeds files without recording revisions
    pub fn with_files<'a>(self, files: impl IntoIterator<Item = (&'a str, JsonValue)>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for (path, body) in files {
                state.files.insert(path.to_string(), body);
            }
        }
        self
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn file(&self, path: &str) -> Option<JsonValue> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn pushes(&self) -> usize {
        self.state.lock().unwrap().pushes
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_files(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.paths())
    }

    async fn read_file(&self, path: &str) -> Result<JsonValue, BackendError> {
        self.file(path)
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    async fn write_file(
        &self,
        path: &str,
        body: &JsonValue,
        _message: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        let action = match state.files.insert(path.to_string(), body.clone()) {
            Some(_) => FileAction::Updated,
            None => FileAction::Created,
        };
        state.record(action, path, None);
        Ok(())
    }

    async fn delete_file(&self, path: &str, _message: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        let doomed: Vec<String> = if path.ends_with('/') {
            state
                .files
                .keys()
                .filter(|p| p.starts_with(path))
                .cloned()
                .collect()
        } else {
            state.files.keys().filter(|p| *p == path).cloned().collect()
        };
        if doomed.is_empty() {
            return Err(BackendError::NotFound(path.to_string()));
        }
        for p in doomed {
            state.files.remove(&p);
            state.record(FileAction::Deleted, &p, None);
        }
        Ok(())
    }

    async fn move_file(&self, from: &str, to: &str, _message: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        let body = state
            .files
            .remove(from)
            .ok_or_else(|| BackendError::NotFound(from.to_string()))?;
        state.files.insert(to.to_string(), body);
        state.record(FileAction::Moved, to, Some(from));
        Ok(())
    }

    async fn test(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn latest_ref(&self) -> Result<Option<String>, BackendError> {
        if !self.versioned {
            return Ok(None);
        }
        Ok(Some(format!("rev-{}", self.state.lock().unwrap().revision)))
    }

    async fn changes_since(&self, since: &str) -> Result<Option<Vec<FileChange>>, BackendError> {
        let Some(since) = since
            .strip_prefix("rev-")
            .and_then(|rev| rev.parse::<u64>().ok())
        else {
            return Ok(None);
        };
        if !self.versioned {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        Ok(Some(
            state
                .log
                .iter()
                .filter(|(rev, _)| *rev > since)
                .map(|(_, change)| change.clone())
                .collect(),
        ))
    }

    async fn stage(
        &self,
        _options: &StageOptions,
    ) -> Result<Option<Box<dyn StagedBackend>>, BackendError> {
        if !self.staging {
            return Ok(None);
        }
        let scratch = MemoryBackend::new();
        scratch.state.lock().unwrap().files = self.state.lock().unwrap().files.clone();
        Ok(Some(Box::new(MemoryStage {
            target: self.clone(),
            scratch,
        })))
    }
}

struct MemoryStage {
    target: MemoryBackend,
    scratch: MemoryBackend,
}

#[async_trait]
impl StagedBackend for MemoryStage {
    fn writer(&self) -> &dyn Backend {
        &self.scratch
    }

    async fn push(&self) -> Result<(), BackendError> {
        let staged = self.scratch.state.lock().unwrap().files.clone();
        let mut target = self.target.state.lock().unwrap();

        let removed: Vec<String> = target
            .files
            .keys()
            .filter(|p| !staged.contains_key(*p))
            .cloned()
            .collect();
        for path in removed {
            target.files.remove(&path);
            target.record(FileAction::Deleted, &path, None);
        }
        for (path, body) in staged {
            match target.files.insert(path.clone(), body.clone()) {
                None => target.record(FileAction::Created, &path, None),
                Some(previous) if previous != body => {
                    target.record(FileAction::Updated, &path, None)
                }
                Some(_) => {}
            }
        }
        target.pushes += 1;
        Ok(())
    }
}

// ============================================================================
// Managed namespace
// ============================================================================

pub struct MemoryNamespace {
    namespace: String,
    items: Mutex<BTreeMap<(String, String), ManagedResource>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryNamespace {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            items: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn insert(&self, resource: ManagedResource) {
        self.items
            .lock()
            .unwrap()
            .insert((resource.kind.clone(), resource.name.clone()), resource);
    }

    pub fn resource(&self, kind: &str, name: &str) -> Option<ManagedResource> {
        self.items
            .lock()
            .unwrap()
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
    }

    pub fn all(&self) -> Vec<ManagedResource> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    /// Makes upserts of resources named `name` fail
    pub fn fail_upserts_of(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl NamespaceClient for MemoryNamespace {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list(&self) -> Result<Vec<ManagedResource>, ResourceError> {
        Ok(self.all())
    }

    async fn upsert(&self, resource: &ManagedResource) -> Result<UpsertOutcome, ResourceError> {
        if self.failing.lock().unwrap().contains(&resource.name) {
            return Err(ResourceError::Api(provisioner_client::ClientError::from_status(
                500,
                format!("rejected {}", resource.name),
            )));
        }
        let previous = self
            .items
            .lock()
            .unwrap()
            .insert((resource.kind.clone(), resource.name.clone()), resource.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }

    async fn delete(&self, kind: &str, name: &str) -> Result<(), ResourceError> {
        self.items
            .lock()
            .unwrap()
            .remove(&(kind.to_string(), name.to_string()));
        Ok(())
    }
}

/// Hands out the same backend and namespace for every repository
pub struct StaticFactory {
    pub backend: Arc<dyn Backend>,
    pub resources: Arc<dyn NamespaceClient>,
}

#[async_trait]
impl ClientFactory for StaticFactory {
    async fn clients_for(&self, repository: &Repository) -> Result<RepositoryHandle, BackendError> {
        Ok(RepositoryHandle {
            repository: repository.clone(),
            backend: self.backend.clone(),
            resources: self.resources.clone(),
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn job_fixture(namespace: &str, name: &str, action: JobAction, repository: &str) -> Job {
    Job::new(
        ObjectMeta::new(namespace, name),
        JobSpec::new(action, repository),
    )
}

pub fn repository_fixture(namespace: &str, name: &str, path: &str) -> Repository {
    Repository {
        metadata: ObjectMeta::new(namespace, name),
        spec: RepositorySpec {
            title: name.to_string(),
            backend: BackendSpec::Local {
                path: path.to_string(),
            },
            target_namespace: namespace.to_string(),
            sync: SyncOptions::default(),
        },
        status: RepositoryStatus::default(),
    }
}

pub fn handle_fixture(backend: &MemoryBackend, resources: &Arc<MemoryNamespace>) -> RepositoryHandle {
    RepositoryHandle {
        repository: repository_fixture("default", "repo", "/srv/repo"),
        backend: Arc::new(backend.clone()),
        resources: resources.clone(),
    }
}

pub fn dashboard(name: &str, title: &str) -> JsonValue {
    json!({
        "kind": "Dashboard",
        "metadata": { "name": name },
        "spec": { "title": title }
    })
}
