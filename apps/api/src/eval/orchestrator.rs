//! Evaluation Orchestrator — compares one or two prompt versions on a single input.
//!
//! Flow: resolve prompt versions → generate (both versions concurrently) →
//!       token/cost accounting → text comparison → validation → EvalResult.
//!
//! [`evaluate`] never returns an error: any failure in the flow is folded into
//! an `EvalResult` with `status = failure` and the error message.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::eval::compare::compare;
use crate::eval::cost::CostTable;
use crate::eval::validation::{validate, CustomRuleResolver, ValidationContext};
use crate::llm_client::{ClientProvider, GenerationError};
use crate::models::eval::{
    EvalMetrics, EvalRequest, EvalResult, EvalStatus, PromptTokenMetrics, RuntimeMetrics,
    SimilarityMetrics, TokenMetrics, TokenUsage, ValidationResult,
};
use crate::models::prompt::Prompt;
use crate::storage::{PromptStore, StorageError};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evalConfig.inputs must contain at least one input set")]
    NoInputs,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Prompt {id} version {version} has no model configuration")]
    MissingModelConfig { id: String, version: String },

    #[error("Generation failed for version {version}: {source}")]
    Generation {
        version: String,
        #[source]
        source: GenerationError,
    },
}

/// Collaborators the orchestrator reads from. All are owned by the caller.
pub struct EvalContext<'a> {
    pub store: &'a dyn PromptStore,
    pub clients: &'a dyn ClientProvider,
    pub costs: &'a CostTable,
    pub rules: &'a dyn CustomRuleResolver,
}

/// Output of one prompt version's generation.
struct VersionRun {
    output: String,
    usage: TokenUsage,
    model: String,
}

/// Everything a successful run produces apart from timing.
struct Completed {
    output1: String,
    output2: Option<String>,
    tokens: TokenMetrics,
    cost: Option<f64>,
    similarity: Option<SimilarityMetrics>,
    validation_results: Vec<ValidationResult>,
    custom_metrics: Option<BTreeMap<String, f64>>,
}

/// Runs one evaluation and always returns a well-formed [`EvalResult`].
pub async fn evaluate(ctx: &EvalContext<'_>, request: EvalRequest) -> EvalResult {
    let start_time = Utc::now();
    let timer = Instant::now();

    info!(
        "Evaluating prompt {} version {}{}",
        request.prompt_id,
        request.version1,
        request
            .version2
            .as_deref()
            .map(|v| format!(" against {v}"))
            .unwrap_or_default()
    );

    let outcome = run(ctx, &request).await;

    let end_time = Utc::now();
    let runtime = RuntimeMetrics {
        total_ms: timer.elapsed().as_secs_f64() * 1000.0,
        start_time,
        end_time,
    };

    let EvalRequest {
        prompt_id,
        version1,
        version2,
        eval_config,
    } = request;
    let input = eval_config.inputs.into_iter().next().unwrap_or_default();

    match outcome {
        Ok(done) => {
            info!(
                "Evaluation of prompt {prompt_id} succeeded in {:.1}ms",
                runtime.total_ms
            );
            EvalResult {
                id: Uuid::new_v4(),
                eval_id: eval_config.id,
                prompt_id,
                version1,
                version2,
                timestamp: end_time,
                input,
                output1: done.output1,
                output2: done.output2,
                metrics: EvalMetrics {
                    runtime,
                    tokens: Some(done.tokens),
                    cost: done.cost,
                    similarity: done.similarity,
                    custom_metrics: done.custom_metrics,
                },
                validation_results: done.validation_results,
                status: EvalStatus::Success,
                error: None,
                metadata: eval_config.metadata,
            }
        }
        Err(e) => {
            warn!("Evaluation of prompt {prompt_id} failed: {e}");
            EvalResult {
                id: Uuid::new_v4(),
                eval_id: eval_config.id,
                prompt_id,
                version1,
                version2,
                timestamp: end_time,
                input,
                output1: String::new(),
                output2: None,
                metrics: EvalMetrics {
                    runtime,
                    tokens: None,
                    cost: None,
                    similarity: None,
                    custom_metrics: None,
                },
                validation_results: Vec::new(),
                status: EvalStatus::Failure,
                error: Some(e.to_string()),
                metadata: eval_config.metadata,
            }
        }
    }
}

async fn run(ctx: &EvalContext<'_>, request: &EvalRequest) -> Result<Completed, EvalError> {
    let config = &request.eval_config;
    let input = config.inputs.first().ok_or(EvalError::NoInputs)?;

    let prompt1 = ctx
        .store
        .get_prompt(&request.prompt_id, &request.version1)
        .await?;
    let prompt2 = match &request.version2 {
        Some(version) => Some(ctx.store.get_prompt(&request.prompt_id, version).await?),
        None => None,
    };

    // Independent calls: fire both, await both.
    let (first, second) = tokio::join!(generate(ctx, &prompt1, input), async {
        match &prompt2 {
            Some(prompt) => Some(generate(ctx, prompt, input).await),
            None => None,
        }
    });
    let first = first?;
    let second = second.transpose()?;

    let prompt1_tokens = token_metrics(ctx.costs, &first);
    let prompt2_tokens = second.as_ref().map(|run| token_metrics(ctx.costs, run));

    let known_costs: Vec<f64> = std::iter::once(prompt1_tokens.cost)
        .chain(prompt2_tokens.as_ref().map(|t| t.cost))
        .flatten()
        .collect();
    let cost = (!known_costs.is_empty()).then(|| known_costs.iter().sum::<f64>());

    let similarity = second.as_ref().map(|run| {
        let comparison = compare(&first.output, &run.output, config.comparison);
        SimilarityMetrics {
            cosine_similarity: comparison.similarity,
            levenshtein_distance: comparison.edit_distance,
        }
    });

    let validation_ctx = ValidationContext {
        expected_outputs: config.expected_outputs.as_deref().unwrap_or_default(),
        comparison: config.comparison,
        resolver: ctx.rules,
    };
    let validation_results = validate(&first.output, &config.validation_rules, &validation_ctx);
    let custom_metrics = pass_rate(&validation_results)
        .map(|rate| BTreeMap::from([("validationPassRate".to_string(), rate)]));

    Ok(Completed {
        output1: first.output,
        output2: second.map(|run| run.output),
        tokens: TokenMetrics {
            prompt1: prompt1_tokens,
            prompt2: prompt2_tokens,
        },
        cost,
        similarity,
        validation_results,
        custom_metrics,
    })
}

async fn generate(
    ctx: &EvalContext<'_>,
    prompt: &Prompt,
    input: &Map<String, Value>,
) -> Result<VersionRun, EvalError> {
    let config = prompt
        .config
        .as_ref()
        .ok_or_else(|| EvalError::MissingModelConfig {
            id: prompt.id.clone(),
            version: prompt.version.clone(),
        })?;

    let generation_error = |source| EvalError::Generation {
        version: prompt.version.clone(),
        source,
    };

    let client = ctx.clients.client_for(config).map_err(generation_error)?;
    let generation = client
        .generate(&prompt.content, input)
        .await
        .map_err(generation_error)?;

    debug!(
        "Generated {} tokens for {} version {}",
        generation.usage.total_tokens, prompt.id, prompt.version
    );

    Ok(VersionRun {
        output: generation.text,
        usage: generation.usage,
        model: config.model().to_string(),
    })
}

/// Unknown models keep their token counts but drop the cost.
fn token_metrics(costs: &CostTable, run: &VersionRun) -> PromptTokenMetrics {
    let cost = match costs.cost(&run.model, &run.usage) {
        Ok(cost) => Some(cost),
        Err(e) => {
            warn!("{e}; omitting cost from evaluation metrics");
            None
        }
    };
    PromptTokenMetrics {
        input: run.usage.prompt_tokens,
        output: run.usage.completion_tokens,
        total: run.usage.total_tokens,
        cost,
    }
}

fn pass_rate(results: &[ValidationResult]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let passed = results.iter().filter(|r| r.passed).count();
    Some(passed as f64 / results.len() as f64)
}
