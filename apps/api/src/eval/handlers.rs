use axum::{extract::State, Json};

use crate::eval::orchestrator::{evaluate, EvalContext};
use crate::models::eval::{EvalRequest, EvalResult};
use crate::state::AppState;

/// POST /api/v1/llm/eval
/// Always 200: evaluation failures are reported inside the result body.
pub async fn handle_eval(
    State(state): State<AppState>,
    Json(req): Json<EvalRequest>,
) -> Json<EvalResult> {
    let ctx = EvalContext {
        store: state.store.as_ref(),
        clients: state.clients.as_ref(),
        costs: &state.costs,
        rules: state.custom_rules.as_ref(),
    };
    Json(evaluate(&ctx, req).await)
}
