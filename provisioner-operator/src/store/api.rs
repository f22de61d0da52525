//! Resource API backed store

use async_trait::async_trait;
use provisioner_client::ResourceClient;
use provisioner_core::domain::Resource;
use provisioner_core::domain::patch::PatchOperation;
use std::marker::PhantomData;

use super::{ResourceStore, StoreResult};

/// Store for one resource collection within a namespace
pub struct ApiStore<T> {
    client: ResourceClient,
    namespace: String,
    _kind: PhantomData<fn() -> T>,
}

impl<T> ApiStore<T> {
    pub fn new(client: ResourceClient, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Resource> ResourceStore<T> for ApiStore<T> {
    async fn create(&self, resource: T) -> StoreResult<T> {
        Ok(self.client.create(&resource).await?)
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<T> {
        Ok(self.client.get(namespace, name).await?)
    }

    async fn list(&self) -> StoreResult<Vec<T>> {
        Ok(self.client.list(&self.namespace).await?)
    }

    async fn update(&self, resource: T) -> StoreResult<T> {
        Ok(self.client.update(&resource).await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()> {
        Ok(self.client.delete::<T>(namespace, name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        ops: &[PatchOperation],
    ) -> StoreResult<T> {
        Ok(self.client.patch_status(namespace, name, ops).await?)
    }
}
