//! Typed resource endpoints
//!
//! Every provisioning kind is served under
//! `/apis/provisioning/v0alpha1/namespaces/{namespace}/{plural}`.

use provisioner_core::domain::Resource;
use provisioner_core::domain::patch::PatchOperation;
use serde::Deserialize;

use crate::ResourceClient;
use crate::error::{ClientError, Result};

/// Content type of RFC 6902 patch bodies
const JSON_PATCH: &str = "application/json-patch+json";

#[derive(Debug, Deserialize)]
struct ResourceList<T> {
    items: Vec<T>,
}

impl ResourceClient {
    /// List every resource of kind `T` in a namespace
    pub async fn list<T: Resource>(&self, namespace: &str) -> Result<Vec<T>> {
        let url = self.collection_url(namespace, T::PLURAL);
        let response = self.client.get(&url).send().await?;

        let list: ResourceList<T> = self.handle_response(response).await?;
        Ok(list.items)
    }

    /// Get one resource by name
    pub async fn get<T: Resource>(&self, namespace: &str, name: &str) -> Result<T> {
        let url = self.item_url(namespace, T::PLURAL, name);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Create a resource; a name collision is reported as `AlreadyExists`
    pub async fn create<T: Resource>(&self, resource: &T) -> Result<T> {
        let meta = resource.metadata();
        let url = self.collection_url(&meta.namespace, T::PLURAL);
        let response = self.client.post(&url).json(resource).send().await?;

        self.handle_response(response).await.map_err(|e| match e {
            ClientError::Conflict(message) => ClientError::AlreadyExists(message),
            other => other,
        })
    }

    /// Conditional update: the server rejects the write with `Conflict` unless
    /// `metadata.resourceVersion` matches the stored version
    pub async fn update<T: Resource>(&self, resource: &T) -> Result<T> {
        let meta = resource.metadata();
        let url = self.item_url(&meta.namespace, T::PLURAL, &meta.name);
        let response = self.client.put(&url).json(resource).send().await?;

        self.handle_response(response).await
    }

    /// Delete a resource by name
    pub async fn delete<T: Resource>(&self, namespace: &str, name: &str) -> Result<()> {
        let url = self.item_url(namespace, T::PLURAL, name);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Apply JSON-patch operations to the `status` subresource
    pub async fn patch_status<T: Resource>(
        &self,
        namespace: &str,
        name: &str,
        ops: &[PatchOperation],
    ) -> Result<T> {
        let url = format!("{}/status", self.item_url(namespace, T::PLURAL, name));
        let body = serde_json::to_vec(ops)
            .map_err(|e| ClientError::ParseError(format!("Failed to encode patch: {}", e)))?;

        tracing::debug!("Patching {} {}/{} status", T::KIND, namespace, name);

        let response = self
            .client
            .patch(&url)
            .header(reqwest::header::CONTENT_TYPE, JSON_PATCH)
            .body(body)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
