//! API Module
//!
//! HTTP surface of the operator. Only liveness is served here; jobs and
//! repositories are managed through the resource API.

pub mod health;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

/// Create the operator router
pub fn create_router() -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
}
