//! Record task routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/tasks` | All record tasks |
//! | POST | `/api/tasks` | Create a task and its capture job |
//! | DELETE | `/api/tasks/{id}` | Stop a task |
//!
//! Creating a task queues its capture job; deleting it force-archives the
//! job, which the running capture picks up as a cancellation.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::api::extract::{ApiJson, ApiPath};
use crate::api::server::AppState;
use crate::coordinator::CreateTask;
use crate::database::models::RecordTaskDbModel;
use crate::domain::CaptureParams;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/{id}", delete(delete_task))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    pub params: CaptureParams,
    /// Defaults to the capture start time.
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: i64,
    pub job_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTaskResponse {
    pub task_id: i64,
    pub archived_job_id: Option<i64>,
}

async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<Vec<RecordTaskDbModel>>> {
    Ok(Json(state.coordinator.list_tasks().await?))
}

async fn create_task(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<CreateTaskResponse>)> {
    let schedule_time = request.schedule_time.or(request.params.start_time);
    let (task_id, job_id) = state
        .coordinator
        .create_task(CreateTask {
            params: request.params,
            schedule_time,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(CreateTaskResponse { task_id, job_id })))
}

async fn delete_task(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<DeleteTaskResponse>> {
    let stopped = state.coordinator.stop_task(id).await?;
    Ok(Json(DeleteTaskResponse {
        task_id: stopped.task_id,
        archived_job_id: stopped.archived_job_id,
    }))
}
