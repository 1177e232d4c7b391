//! Runner-facing lease routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/runners/{name}/lease` | Lease the next eligible job (204 when none) |
//! | GET | `/api/runners/{name}/jobs` | Active jobs leased by the runner |

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::ApiPath;
use crate::api::server::AppState;
use crate::domain::Job;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{name}/lease", post(lease_job))
        .route("/{name}/jobs", get(list_runner_jobs))
}

async fn lease_job(
    State(state): State<AppState>,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<Response> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("runner name must not be empty"));
    }
    match state.coordinator.lease(&name).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn list_runner_jobs(
    State(state): State<AppState>,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.coordinator.list_by_runner(&name).await?))
}
