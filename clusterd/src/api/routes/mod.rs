//! API route modules.
//!
//! Organizes routes by resource type.

pub mod callbacks;
pub mod download;
pub mod health;
pub mod job;
pub mod runners;
pub mod tasks;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/runners", runners::router())
        .nest("/api/jobs", job::router())
        .nest("/api/tasks", tasks::router())
        .nest("/api/callbacks", callbacks::router())
        .nest("/api/download", download::router())
        .nest("/api/health", health::router())
        .with_state(state)
}
