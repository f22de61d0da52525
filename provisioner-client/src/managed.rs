//! Managed namespace endpoints
//!
//! Resources provisioned from repositories live outside the provisioning API
//! group; they are exchanged as [`ManagedResource`] envelopes.

use provisioner_core::domain::resource::ManagedResource;
use reqwest::StatusCode;

use crate::ResourceClient;
use crate::error::{ClientError, Result};

const MANAGED_PREFIX: &str = "apis/resources/v1";

/// Whether an upsert created a new resource or replaced an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl ResourceClient {
    fn managed_url(&self, namespace: &str) -> String {
        format!(
            "{}/{}/namespaces/{}/resources",
            self.base_url, MANAGED_PREFIX, namespace
        )
    }

    /// List all resources in a managed namespace
    pub async fn list_managed(&self, namespace: &str) -> Result<Vec<ManagedResource>> {
        let url = self.managed_url(namespace);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Create or replace a resource, keyed by kind and name
    pub async fn upsert_managed(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<UpsertOutcome> {
        let url = format!(
            "{}/{}/{}",
            self.managed_url(namespace),
            resource.kind,
            resource.name
        );
        let response = self.client.put(&url).json(resource).send().await?;

        let status = response.status();
        self.handle_empty_response(response).await?;

        Ok(if status == StatusCode::CREATED {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    /// Delete a resource from a managed namespace
    pub async fn delete_managed(&self, namespace: &str, kind: &str, name: &str) -> Result<()> {
        let url = format!("{}/{}/{}", self.managed_url(namespace), kind, name);
        let response = self.client.delete(&url).send().await?;

        match self.handle_empty_response(response).await {
            Err(ClientError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}
