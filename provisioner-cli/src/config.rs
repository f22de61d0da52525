//! Configuration module

use provisioner_client::ResourceClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the resource API
    pub api_url: String,
    pub namespace: String,
}

impl Config {
    pub fn client(&self) -> ResourceClient {
        ResourceClient::new(self.api_url.clone())
    }
}
