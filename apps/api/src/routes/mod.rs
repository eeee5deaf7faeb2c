pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::eval::handlers as eval;
use crate::llm_client::handlers as llm;
use crate::prompts::handlers as prompts;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Prompt API
        .route(
            "/api/v1/prompts",
            get(prompts::handle_list_prompts).post(prompts::handle_create_prompt),
        )
        .route("/api/v1/prompts/execute", post(prompts::handle_execute_prompt))
        .route(
            "/api/v1/prompts/:id/versions",
            get(prompts::handle_prompt_versions),
        )
        .route(
            "/api/v1/prompts/:id/children",
            get(prompts::handle_sub_prompts),
        )
        .route(
            "/api/v1/prompts/:id/:version",
            get(prompts::handle_get_prompt)
                .put(prompts::handle_update_prompt)
                .delete(prompts::handle_delete_prompt),
        )
        // Evaluation API
        .route("/api/v1/llm/eval", post(eval::handle_eval))
        .route("/api/v1/llm/clients/reset", post(llm::handle_reset_client))
        .with_state(state)
}
