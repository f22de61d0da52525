//! Clients for a repository's two sides
//!
//! Every job works on a repository handle: the backend holding the files
//! and a client for the namespace the files are provisioned into.

use async_trait::async_trait;
use provisioner_client::{ClientError, ResourceClient, UpsertOutcome};
use provisioner_core::domain::repository::{BackendSpec, Repository};
use provisioner_core::domain::resource::ManagedResource;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::backend::{Backend, BackendError, GitBackend, LocalBackend};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource API error: {0}")]
    Api(#[from] ClientError),
}

/// Access to the resources of one managed namespace
#[async_trait]
pub trait NamespaceClient: Send + Sync {
    fn namespace(&self) -> &str;

    async fn list(&self) -> Result<Vec<ManagedResource>, ResourceError>;

    async fn upsert(&self, resource: &ManagedResource) -> Result<UpsertOutcome, ResourceError>;

    /// Deleting a missing resource succeeds
    async fn delete(&self, kind: &str, name: &str) -> Result<(), ResourceError>;
}

pub struct ApiNamespaceClient {
    client: ResourceClient,
    namespace: String,
}

impl ApiNamespaceClient {
    pub fn new(client: ResourceClient, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl NamespaceClient for ApiNamespaceClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list(&self) -> Result<Vec<ManagedResource>, ResourceError> {
        Ok(self.client.list_managed(&self.namespace).await?)
    }

    async fn upsert(&self, resource: &ManagedResource) -> Result<UpsertOutcome, ResourceError> {
        Ok(self.client.upsert_managed(&self.namespace, resource).await?)
    }

    async fn delete(&self, kind: &str, name: &str) -> Result<(), ResourceError> {
        Ok(self
            .client
            .delete_managed(&self.namespace, kind, name)
            .await?)
    }
}

/// Everything a worker needs to act on one repository
#[derive(Clone)]
pub struct RepositoryHandle {
    pub repository: Repository,
    pub backend: Arc<dyn Backend>,
    pub resources: Arc<dyn NamespaceClient>,
}

impl RepositoryHandle {
    pub fn name(&self) -> &str {
        &self.repository.metadata.name
    }
}

/// Builds repository handles from repository configuration
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn clients_for(&self, repository: &Repository) -> Result<RepositoryHandle, BackendError>;
}

pub struct DefaultClientFactory {
    client: ResourceClient,
}

impl DefaultClientFactory {
    pub fn new(client: ResourceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClientFactory for DefaultClientFactory {
    async fn clients_for(&self, repository: &Repository) -> Result<RepositoryHandle, BackendError> {
        debug!(
            "Opening {} backend for repository {}",
            repository.spec.backend.type_name(),
            repository.metadata.name
        );
        let backend: Arc<dyn Backend> = match &repository.spec.backend {
            BackendSpec::Local { path } => Arc::new(LocalBackend::new(path)),
            BackendSpec::Git { url, branch, path } | BackendSpec::GitHub { url, branch, path } => {
                Arc::new(GitBackend::new(url, branch.clone(), path.clone()))
            }
        };

        Ok(RepositoryHandle {
            repository: repository.clone(),
            backend,
            resources: Arc::new(ApiNamespaceClient::new(
                self.client.clone(),
                repository.spec.target_namespace.clone(),
            )),
        })
    }
}
