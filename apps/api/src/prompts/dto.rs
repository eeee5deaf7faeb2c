use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::models::prompt::{
    Condition, DynamicTag, Example, LlmConfig, Memory, PromptMetadata,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePromptRequest {
    pub name: String,
    pub version: String,
    pub content: String,
    #[serde(default)]
    pub static_tags: Vec<String>,
    #[serde(default)]
    pub dynamic_tags: Vec<DynamicTag>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub supported_languages: Vec<String>,
    #[serde(default)]
    pub examples: Option<Vec<Example>>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub memory: Option<Memory>,
    #[serde(default)]
    pub metadata: Option<PromptMetadata>,
    #[serde(default)]
    pub config: Option<LlmConfig>,
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromptRequest {
    pub name: Option<String>,
    pub content: Option<String>,
    pub static_tags: Option<Vec<String>>,
    pub dynamic_tags: Option<Vec<DynamicTag>>,
    pub conditions: Option<Vec<Condition>>,
    pub supported_languages: Option<Vec<String>>,
    pub examples: Option<Vec<Example>>,
    /// `None`: keep. `Some(None)`: unlink from the parent. `Some(Some(id))`: relink.
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
    pub memory: Option<Memory>,
    pub metadata: Option<PromptMetadata>,
    pub config: Option<LlmConfig>,
}

/// Distinguishes an explicit `null` from a missing field.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePromptRequest {
    pub prompt_id: String,
    pub version: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// `GET /api/v1/prompts?tags=a,b&searchTerm=x`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub tags: Option<String>,
    pub search_term: Option<String>,
}

impl ListQuery {
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn search(&self) -> Option<&str> {
        self.search_term
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub tokens_used: u32,
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptExecutionResult {
    pub prompt_id: String,
    pub version: String,
    pub input: Map<String, Value>,
    pub output: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: ExecutionMetrics,
    pub active_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}
