use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Request side
// ────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/v1/llm/eval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRequest {
    pub prompt_id: String,
    pub version1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version2: Option<String>,
    pub eval_config: EvalConfig,
}

/// Caller-supplied description of one evaluation run. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Only the first input set is evaluated.
    #[serde(default)]
    pub inputs: Vec<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outputs: Option<Vec<String>>,
    #[serde(default)]
    pub validation_rules: Vec<RuleSpec>,
    #[serde(default)]
    pub comparison: CompareOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Text normalization applied before similarity and edit distance are computed.
/// The default compares raw text, case-sensitively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareOptions {
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub collapse_whitespace: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Validation rules
// ────────────────────────────────────────────────────────────────────────────

/// A declarative check applied to a generated output.
///
/// Every config field is optional. Missing fields are reported by the validation
/// engine as a failed result for that rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum ValidationRule {
    Required(PhraseRuleConfig),
    Forbidden(PhraseRuleConfig),
    Similarity(SimilarityRuleConfig),
    Custom(CustomRuleConfig),
}

impl ValidationRule {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationRule::Required(_) => "required",
            ValidationRule::Forbidden(_) => "forbidden",
            ValidationRule::Similarity(_) => "similarity",
            ValidationRule::Custom(_) => "custom",
        }
    }
}

/// A rule as submitted by the caller.
///
/// Rules that do not decode into a [`ValidationRule`] (unknown `type`, missing or
/// wrong-typed `config`) are kept verbatim in `Malformed`, so one bad rule never
/// rejects the request. The validation engine reports each of them on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    Valid(ValidationRule),
    Malformed(Value),
}

impl RuleSpec {
    /// The rule's `type`, or `unknown` when a malformed rule carries none.
    pub fn kind(&self) -> &str {
        match self {
            RuleSpec::Valid(rule) => rule.kind(),
            RuleSpec::Malformed(raw) => raw
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }
}

impl From<ValidationRule> for RuleSpec {
    fn from(rule: ValidationRule) -> Self {
        RuleSpec::Valid(rule)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseRuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrases: Option<Vec<String>>,
    #[serde(default)]
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityRuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Falls back to `EvalConfig::expected_outputs[0]` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule: RuleSpec,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Token accounting
// ────────────────────────────────────────────────────────────────────────────

/// Token units consumed by one generation. `total_tokens` is always the sum
/// of the other two; build values through [`TokenUsage::new`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Result side
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetrics {
    pub total_ms: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Token usage and cost of one prompt version's generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTokenMetrics {
    pub input: u32,
    pub output: u32,
    pub total: u32,
    /// Omitted when the model has no entry in the rate table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub prompt1: PromptTokenMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt2: Option<PromptTokenMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityMetrics {
    pub cosine_similarity: f64,
    pub levenshtein_distance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalMetrics {
    pub runtime: RuntimeMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenMetrics>,
    /// Sum of the known per-prompt costs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Present only when two outputs were compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<SimilarityMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_metrics: Option<BTreeMap<String, f64>>,
}

/// Terminal artifact of one evaluation call. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_id: Option<String>,
    pub prompt_id: String,
    pub version1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version2: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub input: Map<String, Value>,
    pub output1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output2: Option<String>,
    pub metrics: EvalMetrics,
    #[serde(default)]
    pub validation_results: Vec<ValidationResult>,
    pub status: EvalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}
