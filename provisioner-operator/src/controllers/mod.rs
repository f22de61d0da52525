//! Controllers
//!
//! Informer-driven reconcilers for the resource kinds the operator watches.
//! Each controller consumes watch events from a [`PollingInformer`] and
//! converges one aspect of resource status.

pub mod connection;
pub mod history;
pub mod informer;
pub mod job;
pub mod queue;
pub mod repository;

// Re-export implementations
pub use connection::{ConnectionController, ConnectionTester, HttpConnectionTester};
pub use history::HistoryJobController;
pub use informer::{PollingInformer, WatchEvent};
pub use job::JobController;
pub use queue::RetryQueue;
pub use repository::RepositoryController;
