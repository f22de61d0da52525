//! Provisioner resource API client
//!
//! A small, type-safe HTTP client for the declarative resource API that
//! stores Jobs, HistoricJobs, Repositories and Connections, and for the
//! managed namespaces those repositories provision.
//!
//! # Example
//!
//! ```no_run
//! use provisioner_client::ResourceClient;
//! use provisioner_core::domain::job::Job;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ResourceClient::new("http://localhost:8080");
//!     let jobs: Vec<Job> = client.list("default").await?;
//!     println!("{} job(s)", jobs.len());
//!     Ok(())
//! }
//! ```

pub mod error;
mod managed;
mod resources;

pub use error::{ClientError, Result};
pub use managed::UpsertOutcome;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// API group and version serving provisioning resources
pub const API_PREFIX: &str = "apis/provisioning/v0alpha1";

/// HTTP client for the resource API
#[derive(Debug, Clone)]
pub struct ResourceClient {
    /// Base URL of the resource API (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ResourceClient {
    /// Create a new resource API client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the resource API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows configuring timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the resource API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks that the API answers at all
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/{}", self.base_url, API_PREFIX);
        let response = self.client.get(&url).send().await?;
        self.handle_empty_response(response).await
    }

    fn collection_url(&self, namespace: &str, plural: &str) -> String {
        format!(
            "{}/{}/namespaces/{}/{}",
            self.base_url, API_PREFIX, namespace, plural
        )
    }

    fn item_url(&self, namespace: &str, plural: &str, name: &str) -> String {
        format!("{}/{}", self.collection_url(namespace, plural), name)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::from_status(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::from_status(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ResourceClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_resource_urls() {
        let client = ResourceClient::new("http://api:8080");
        assert_eq!(
            client.collection_url("team-a", "jobs"),
            "http://api:8080/apis/provisioning/v0alpha1/namespaces/team-a/jobs"
        );
        assert_eq!(
            client.item_url("team-a", "repositories", "main"),
            "http://api:8080/apis/provisioning/v0alpha1/namespaces/team-a/repositories/main"
        );
    }
}
