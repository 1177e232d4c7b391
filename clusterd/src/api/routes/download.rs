//! Recording downloads.
//!
//! A recording or artifact is served as the init segment followed by every
//! media segment, with the exact total as `Content-Length`.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::ApiPath;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(download_recording))
        .route("/{id}/{artifact}", get(download_artifact))
}

async fn download_recording(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Response> {
    serve(&state, id, None).await
}

async fn download_artifact(
    State(state): State<AppState>,
    ApiPath((id, artifact)): ApiPath<(i64, String)>,
) -> ApiResult<Response> {
    serve(&state, id, Some(&artifact)).await
}

async fn serve(state: &AppState, id: i64, artifact: Option<&str>) -> ApiResult<Response> {
    let (plan, filename) = state.coordinator.download_plan(id, artifact).await?;
    debug!(
        job_id = id,
        artifact,
        files = plan.file_count(),
        bytes = plan.total_len(),
        "serving download"
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.total_len()));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|e| ApiError::internal(format!("Invalid header value: {e}")))?,
    );

    Ok((headers, Body::from_stream(plan.into_stream())).into_response())
}
