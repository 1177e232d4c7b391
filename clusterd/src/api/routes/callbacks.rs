//! Callback template and rule routes.
//!
//! Only what notification resolution needs: create a template, bind it to a
//! domain/app, list bindings.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::ApiJson;
use crate::api::server::AppState;
use crate::database::models::CallbackRuleDbModel;
use crate::database::time::now_ms;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", post(create_template))
        .route("/rules", post(bind_rule).get(list_rules))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub record_notify_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateResponse {
    pub template_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindRuleRequest {
    pub domain_name: String,
    #[serde(default)]
    pub app_name: String,
    pub template_id: i64,
}

async fn create_template(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<CreateTemplateResponse>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("template name must not be empty"));
    }
    let template_id = state
        .coordinator
        .callbacks()
        .create_template(
            &request.name,
            request.description.as_deref(),
            request.record_notify_url.as_deref(),
            now_ms(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(CreateTemplateResponse { template_id })))
}

async fn bind_rule(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BindRuleRequest>,
) -> ApiResult<StatusCode> {
    if request.domain_name.trim().is_empty() {
        return Err(ApiError::validation("domain name must not be empty"));
    }
    let callbacks = state.coordinator.callbacks();
    if callbacks.get_template(request.template_id).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "callback template {} not found",
            request.template_id
        )));
    }
    callbacks
        .upsert_rule(&request.domain_name, &request.app_name, request.template_id, now_ms())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<CallbackRuleDbModel>>> {
    Ok(Json(state.coordinator.callbacks().list_rules().await?))
}
