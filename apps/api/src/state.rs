use std::sync::Arc;

use crate::config::Config;
use crate::eval::cost::CostTable;
use crate::eval::validation::CustomRuleRegistry;
use crate::llm_client::ClientProvider;
use crate::storage::PromptStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PromptStore>,
    /// Generation clients; a bounded `ClientRegistry` in production.
    pub clients: Arc<dyn ClientProvider>,
    pub costs: Arc<CostTable>,
    pub custom_rules: Arc<CustomRuleRegistry>,
    pub config: Config,
}
