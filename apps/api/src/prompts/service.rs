//! Prompt Service — CRUD over the prompt store, plus single-shot execution.
//!
//! Prompts are addressed by `(id, version)`. The id is derived from the name on
//! create and never changes afterwards; a new version is a new document.

use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::eval::cost::CostTable;
use crate::llm_client::ClientProvider;
use crate::models::prompt::Prompt;
use crate::prompts::dto::{
    CreatePromptRequest, ExecutePromptRequest, ExecutionMetrics, ListQuery, PromptExecutionResult,
    UpdatePromptRequest,
};
use crate::storage::PromptStore;

/// Lowercases `name` and joins its whitespace-separated words with `-`.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Keeps prompts carrying every tag in `tags` and, when `search` is set, whose
/// name, content or one of whose static tags contains it (case-insensitive).
pub fn filter_prompts(prompts: Vec<Prompt>, tags: &[String], search: Option<&str>) -> Vec<Prompt> {
    let needle = search.map(str::to_lowercase);
    prompts
        .into_iter()
        .filter(|p| tags.iter().all(|t| p.static_tags.contains(t)))
        .filter(|p| match &needle {
            Some(needle) => {
                p.name.to_lowercase().contains(needle)
                    || p.content.to_lowercase().contains(needle)
                    || p.static_tags.iter().any(|t| t.to_lowercase().contains(needle))
            }
            None => true,
        })
        .collect()
}

pub async fn list_prompts(store: &dyn PromptStore, query: &ListQuery) -> Result<Vec<Prompt>, AppError> {
    let prompts = store.list_prompts().await?;
    Ok(filter_prompts(prompts, &query.tag_list(), query.search()))
}

pub async fn create_prompt(
    store: &dyn PromptStore,
    req: CreatePromptRequest,
) -> Result<Prompt, AppError> {
    require_text("name", &req.name)?;
    require_text("content", &req.content)?;
    check_segment("version", &req.version)?;

    let id = slugify(&req.name);
    check_segment("id", &id)?;
    if let Some(parent_id) = &req.parent_id {
        check_parent(store, &id, parent_id).await?;
    }

    if store
        .get_prompt_versions(&id)
        .await?
        .iter()
        .any(|v| *v == req.version)
    {
        return Err(AppError::Conflict(format!(
            "Prompt {id} version {} already exists",
            req.version
        )));
    }

    let now = Utc::now().to_rfc3339();
    let mut metadata = req.metadata.unwrap_or_default();
    metadata.created_at = now.clone();
    metadata.updated_at = now;

    let prompt = Prompt {
        id,
        version: req.version,
        name: req.name,
        content: req.content,
        static_tags: req.static_tags,
        dynamic_tags: req.dynamic_tags,
        conditions: req.conditions,
        supported_languages: req.supported_languages,
        examples: req.examples,
        parent_id: req.parent_id,
        memory: req.memory,
        metadata: Some(metadata),
        config: req.config,
    };

    store.save_prompt(&prompt).await?;
    info!("Created prompt {} version {}", prompt.id, prompt.version);
    Ok(prompt)
}

pub async fn get_prompt(store: &dyn PromptStore, id: &str, version: &str) -> Result<Prompt, AppError> {
    Ok(store.get_prompt(id, version).await?)
}

/// Merges the fields present in `req` into the stored prompt.
pub async fn update_prompt(
    store: &dyn PromptStore,
    id: &str,
    version: &str,
    req: UpdatePromptRequest,
) -> Result<Prompt, AppError> {
    let mut prompt = store.get_prompt(id, version).await?;

    if let Some(name) = req.name {
        require_text("name", &name)?;
        prompt.name = name;
    }
    if let Some(content) = req.content {
        require_text("content", &content)?;
        prompt.content = content;
    }
    match req.parent_id {
        Some(Some(parent_id)) => {
            check_parent(store, id, &parent_id).await?;
            prompt.parent_id = Some(parent_id);
        }
        Some(None) => prompt.parent_id = None,
        None => {}
    }
    if let Some(static_tags) = req.static_tags {
        prompt.static_tags = static_tags;
    }
    if let Some(dynamic_tags) = req.dynamic_tags {
        prompt.dynamic_tags = dynamic_tags;
    }
    if let Some(conditions) = req.conditions {
        prompt.conditions = conditions;
    }
    if let Some(languages) = req.supported_languages {
        prompt.supported_languages = languages;
    }
    if req.examples.is_some() {
        prompt.examples = req.examples;
    }
    if req.memory.is_some() {
        prompt.memory = req.memory;
    }
    if req.config.is_some() {
        prompt.config = req.config;
    }

    let now = Utc::now().to_rfc3339();
    let mut metadata = prompt.metadata.take().unwrap_or_default();
    if let Some(update) = req.metadata {
        metadata.merge(update);
    }
    if metadata.created_at.is_empty() {
        metadata.created_at = now.clone();
    }
    metadata.updated_at = now;
    prompt.metadata = Some(metadata);

    store.save_prompt(&prompt).await?;
    info!("Updated prompt {id} version {version}");
    Ok(prompt)
}

pub async fn delete_prompt(store: &dyn PromptStore, id: &str, version: &str) -> Result<(), AppError> {
    store.delete_prompt(id, version).await?;
    info!("Deleted prompt {id} version {version}");
    Ok(())
}

pub async fn prompt_versions(store: &dyn PromptStore, id: &str) -> Result<Vec<String>, AppError> {
    Ok(store.get_prompt_versions(id).await?)
}

pub async fn sub_prompts(store: &dyn PromptStore, parent_id: &str) -> Result<Vec<Prompt>, AppError> {
    Ok(store.get_sub_prompts(parent_id).await?)
}

/// Renders the prompt with `req.variables`, runs it on the prompt's model and
/// reports usage, latency, cost and the tags active for those variables.
pub async fn execute_prompt(
    store: &dyn PromptStore,
    clients: &dyn ClientProvider,
    costs: &CostTable,
    req: ExecutePromptRequest,
) -> Result<PromptExecutionResult, AppError> {
    let prompt = store.get_prompt(&req.prompt_id, &req.version).await?;
    let config = prompt.config.as_ref().ok_or_else(|| {
        AppError::UnprocessableEntity(format!(
            "Prompt {} version {} has no model configuration",
            prompt.id, prompt.version
        ))
    })?;

    let client = clients.client_for(config)?;

    let timer = Instant::now();
    let generation = client.generate(&prompt.content, &req.variables).await?;
    let execution_time_ms = timer.elapsed().as_secs_f64() * 1000.0;

    let cost = costs
        .cost(config.model(), &generation.usage)
        .map_err(|e| warn!("{e}; execution cost not reported"))
        .ok();

    info!(
        "Executed prompt {} version {} ({} tokens, {:.1}ms)",
        prompt.id, prompt.version, generation.usage.total_tokens, execution_time_ms
    );

    Ok(PromptExecutionResult {
        active_tags: prompt.active_tags(&req.variables),
        prompt_id: prompt.id,
        version: prompt.version,
        input: req.variables,
        output: generation.text,
        timestamp: Utc::now(),
        metrics: ExecutionMetrics {
            tokens_used: generation.usage.total_tokens,
            execution_time_ms,
            cost,
        },
        metadata: req.metadata,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Input checks
// ────────────────────────────────────────────────────────────────────────────

fn require_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Ids and versions become part of the blob key and the `/:id/:version` route,
/// so each must be a single path segment.
fn check_segment(field: &str, value: &str) -> Result<(), AppError> {
    require_text(field, value)?;
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(format!(
            "{field} '{value}' must not contain '/' or whitespace"
        )));
    }
    Ok(())
}

async fn check_parent(store: &dyn PromptStore, id: &str, parent_id: &str) -> Result<(), AppError> {
    if parent_id == id {
        return Err(AppError::Validation(format!(
            "Prompt {id} cannot be its own parent"
        )));
    }
    if store.get_prompt_versions(parent_id).await?.is_empty() {
        return Err(AppError::UnprocessableEntity(format!(
            "Parent prompt {parent_id} does not exist"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use crate::llm_client::template::render;
    use crate::llm_client::{Generation, GenerationClient, GenerationError};
    use crate::models::eval::TokenUsage;
    use crate::models::prompt::LlmConfig;
    use crate::storage::{BlobPromptStore, MemoryBlobStore};

    struct EchoClient;

    #[async_trait]
    impl GenerationClient for EchoClient {
        async fn generate(
            &self,
            template: &str,
            variables: &Map<String, Value>,
        ) -> Result<Generation, GenerationError> {
            Ok(Generation {
                text: render(template, variables)?,
                usage: TokenUsage::new(3, 2),
            })
        }
    }

    struct EchoProvider;

    impl ClientProvider for EchoProvider {
        fn client_for(
            &self,
            _config: &LlmConfig,
        ) -> Result<Arc<dyn GenerationClient>, GenerationError> {
            Ok(Arc::new(EchoClient))
        }
    }

    fn store() -> BlobPromptStore<MemoryBlobStore> {
        BlobPromptStore::new(MemoryBlobStore::default())
    }

    fn create_req(value: Value) -> CreatePromptRequest {
        serde_json::from_value(value).unwrap()
    }

    fn greet(version: &str) -> CreatePromptRequest {
        create_req(json!({
            "name": "Greet User",
            "version": version,
            "content": "Hello {{name}}",
            "staticTags": ["greeting", "en"],
            "dynamicTags": [{
                "tag": { "name": "vip", "type": "dynamic" },
                "condition": { "type": "list", "envKey": "tier", "valueList": ["gold"] }
            }],
            "config": { "provider": "openai", "model": "gpt-4o" }
        }))
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Greet User"), "greet-user");
        assert_eq!(slugify("  Multi   Space\tName "), "multi-space-name");
    }

    #[tokio::test]
    async fn test_create_sets_id_and_timestamps() {
        let store = store();
        let prompt = create_prompt(&store, greet("v1")).await.unwrap();

        assert_eq!(prompt.id, "greet-user");
        let metadata = prompt.metadata.as_ref().unwrap();
        assert!(!metadata.created_at.is_empty());
        assert_eq!(metadata.created_at, metadata.updated_at);
        assert_eq!(store.get_prompt("greet-user", "v1").await.unwrap(), prompt);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_version() {
        let store = store();
        create_prompt(&store, greet("v1")).await.unwrap();
        let err = create_prompt(&store, greet("v1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        create_prompt(&store, greet("v2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let store = store();

        let blank = create_req(json!({ "name": " ", "version": "v1", "content": "x" }));
        assert!(matches!(
            create_prompt(&store, blank).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let slash = create_req(json!({ "name": "a", "version": "v/1", "content": "x" }));
        assert!(matches!(
            create_prompt(&store, slash).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let slash_in_name = create_req(json!({ "name": "A/B test", "version": "v1", "content": "x" }));
        match create_prompt(&store, slash_in_name).await.unwrap_err() {
            AppError::Validation(msg) => assert!(msg.contains("id 'a/b-test'"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(store.list_prompts().await.unwrap().is_empty());

        let own_parent =
            create_req(json!({ "name": "a", "version": "v1", "content": "x", "parentId": "a" }));
        assert!(matches!(
            create_prompt(&store, own_parent).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let orphan =
            create_req(json!({ "name": "a", "version": "v1", "content": "x", "parentId": "ghost" }));
        assert!(matches!(
            create_prompt(&store, orphan).await.unwrap_err(),
            AppError::UnprocessableEntity(_)
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_tags_and_search() {
        let store = store();
        create_prompt(&store, greet("v1")).await.unwrap();
        create_prompt(
            &store,
            create_req(json!({
                "name": "Farewell",
                "version": "v1",
                "content": "Goodbye {{name}}",
                "staticTags": ["en"]
            })),
        )
        .await
        .unwrap();

        let by_tags = ListQuery {
            tags: Some("greeting,en".to_string()),
            search_term: None,
        };
        let listed = list_prompts(&store, &by_tags).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "greet-user");

        let by_search = ListQuery {
            tags: None,
            search_term: Some("GOODBYE".to_string()),
        };
        let listed = list_prompts(&store, &by_search).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "farewell");

        assert_eq!(list_prompts(&store, &ListQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_merges_and_unlinks_parent() {
        let store = store();
        create_prompt(
            &store,
            create_req(json!({ "name": "Root", "version": "v1", "content": "root" })),
        )
        .await
        .unwrap();
        let mut req = greet("v1");
        req.parent_id = Some("root".to_string());
        let created = create_prompt(&store, req).await.unwrap();

        let update: UpdatePromptRequest = serde_json::from_value(json!({
            "content": "Hi {{name}}",
            "metadata": { "description": "shorter" }
        }))
        .unwrap();
        let updated = update_prompt(&store, "greet-user", "v1", update).await.unwrap();
        assert_eq!(updated.content, "Hi {{name}}");
        assert_eq!(updated.static_tags, created.static_tags);
        assert_eq!(updated.parent_id.as_deref(), Some("root"));
        let metadata = updated.metadata.unwrap();
        assert_eq!(metadata.description.as_deref(), Some("shorter"));
        assert_eq!(metadata.created_at, created.metadata.unwrap().created_at);

        let unlink: UpdatePromptRequest =
            serde_json::from_value(json!({ "parentId": null })).unwrap();
        let unlinked = update_prompt(&store, "greet-user", "v1", unlink).await.unwrap();
        assert_eq!(unlinked.parent_id, None);
        assert!(sub_prompts(&store, "root").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_prompt_is_not_found() {
        let err = update_prompt(&store(), "nope", "v1", UpdatePromptRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_then_versions() {
        let store = store();
        create_prompt(&store, greet("v1")).await.unwrap();
        create_prompt(&store, greet("v2")).await.unwrap();

        delete_prompt(&store, "greet-user", "v1").await.unwrap();
        assert_eq!(
            prompt_versions(&store, "greet-user").await.unwrap(),
            vec!["v2".to_string()]
        );
        assert!(matches!(
            delete_prompt(&store, "greet-user", "v1").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_execute_reports_usage_cost_and_tags() {
        let store = store();
        create_prompt(&store, greet("v1")).await.unwrap();

        let req: ExecutePromptRequest = serde_json::from_value(json!({
            "promptId": "greet-user",
            "version": "v1",
            "variables": { "name": "Ann", "tier": "gold" }
        }))
        .unwrap();
        let result = execute_prompt(&store, &EchoProvider, &CostTable::default(), req)
            .await
            .unwrap();

        assert_eq!(result.output, "Hello Ann");
        assert_eq!(result.metrics.tokens_used, 5);
        assert!(result.metrics.cost.unwrap() > 0.0);
        assert_eq!(
            result.active_tags,
            vec!["greeting".to_string(), "en".to_string(), "vip".to_string()]
        );
    }

    #[tokio::test]
    async fn test_execute_without_config_is_unprocessable() {
        let store = store();
        create_prompt(
            &store,
            create_req(json!({ "name": "Bare", "version": "v1", "content": "hi" })),
        )
        .await
        .unwrap();

        let req: ExecutePromptRequest =
            serde_json::from_value(json!({ "promptId": "bare", "version": "v1" })).unwrap();
        let err = execute_prompt(&store, &EchoProvider, &CostTable::default(), req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnprocessableEntity(_)));
    }
}
