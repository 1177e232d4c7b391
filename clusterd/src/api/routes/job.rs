//! Job routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/jobs` | Active jobs |
//! | GET | `/api/jobs/{id}` | Active or archived job |
//! | POST | `/api/jobs/{id}/report` | Runner status report |

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::api::error::ApiResult;
use crate::api::extract::{ApiJson, ApiPath};
use crate::api::server::AppState;
use crate::domain::{Job, StatusReport};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/report", post(report))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.coordinator.list_active().await?))
}

async fn get_job(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> ApiResult<Json<Job>> {
    Ok(Json(state.coordinator.get_job(id).await?))
}

async fn report(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(report): ApiJson<StatusReport>,
) -> ApiResult<StatusCode> {
    state.coordinator.handle_report(id, report).await?;
    Ok(StatusCode::NO_CONTENT)
}
