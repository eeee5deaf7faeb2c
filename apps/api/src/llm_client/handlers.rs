use axum::{extract::State, Json};
use serde::Serialize;

use crate::models::prompt::LlmConfig;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetClientResponse {
    pub client: String,
    pub reset: bool,
}

/// POST /api/v1/llm/clients/reset
/// Drops the cached client for a model configuration, e.g. after rotating its key.
pub async fn handle_reset_client(
    State(state): State<AppState>,
    Json(config): Json<LlmConfig>,
) -> Json<ResetClientResponse> {
    let reset = state.clients.reset(&config);
    Json(ResetClientResponse {
        client: config.instance_key(),
        reset,
    })
}
