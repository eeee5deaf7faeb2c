use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::errors::AppError;
use crate::models::prompt::Prompt;
use crate::prompts::dto::{
    CreatePromptRequest, ExecutePromptRequest, ListQuery, PromptExecutionResult,
    UpdatePromptRequest,
};
use crate::prompts::service;
use crate::state::AppState;

/// GET /api/v1/prompts?tags=a,b&searchTerm=x
pub async fn handle_list_prompts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Prompt>>, AppError> {
    let prompts = service::list_prompts(state.store.as_ref(), &query).await?;
    Ok(Json(prompts))
}

/// POST /api/v1/prompts
pub async fn handle_create_prompt(
    State(state): State<AppState>,
    Json(req): Json<CreatePromptRequest>,
) -> Result<(StatusCode, Json<Prompt>), AppError> {
    let prompt = service::create_prompt(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

/// POST /api/v1/prompts/execute
pub async fn handle_execute_prompt(
    State(state): State<AppState>,
    Json(req): Json<ExecutePromptRequest>,
) -> Result<Json<PromptExecutionResult>, AppError> {
    let result = service::execute_prompt(
        state.store.as_ref(),
        state.clients.as_ref(),
        &state.costs,
        req,
    )
    .await?;
    Ok(Json(result))
}

/// GET /api/v1/prompts/:id/versions
pub async fn handle_prompt_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(service::prompt_versions(state.store.as_ref(), &id).await?))
}

/// GET /api/v1/prompts/:id/children
pub async fn handle_sub_prompts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Prompt>>, AppError> {
    Ok(Json(service::sub_prompts(state.store.as_ref(), &id).await?))
}

/// GET /api/v1/prompts/:id/:version
pub async fn handle_get_prompt(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> Result<Json<Prompt>, AppError> {
    let prompt = service::get_prompt(state.store.as_ref(), &id, &version).await?;
    Ok(Json(prompt))
}

/// PUT /api/v1/prompts/:id/:version
pub async fn handle_update_prompt(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
    Json(req): Json<UpdatePromptRequest>,
) -> Result<Json<Prompt>, AppError> {
    let prompt = service::update_prompt(state.store.as_ref(), &id, &version, req).await?;
    Ok(Json(prompt))
}

/// DELETE /api/v1/prompts/:id/:version
pub async fn handle_delete_prompt(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    service::delete_prompt(state.store.as_ref(), &id, &version).await?;
    Ok(StatusCode::NO_CONTENT)
}
