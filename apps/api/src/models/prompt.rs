use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A versioned prompt template as persisted in the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub version: String,
    pub name: String,
    pub content: String,
    pub static_tags: Vec<String>,
    pub dynamic_tags: Vec<DynamicTag>,
    pub conditions: Vec<Condition>,
    pub supported_languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<Example>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PromptMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<LlmConfig>,
}

impl Prompt {
    /// Static tags plus every dynamic tag whose condition holds for `env`.
    pub fn active_tags(&self, env: &Map<String, Value>) -> Vec<String> {
        let mut tags = self.static_tags.clone();
        for dynamic in &self.dynamic_tags {
            if dynamic.condition.evaluate(env) && !tags.contains(&dynamic.tag.name) {
                tags.push(dynamic.tag.name.clone());
            }
        }
        tags
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TagKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicTag {
    pub tag: Tag,
    pub condition: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatcherFunction {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// A predicate over one key of the execution environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    #[serde(rename_all = "camelCase")]
    Matcher {
        env_key: String,
        eval_function: MatcherFunction,
        eval_value: String,
    },
    #[serde(rename_all = "camelCase")]
    Range {
        env_key: String,
        range_min: f64,
        range_max: f64,
    },
    #[serde(rename_all = "camelCase")]
    List {
        env_key: String,
        value_list: Vec<String>,
    },
}

impl Condition {
    pub fn env_key(&self) -> &str {
        match self {
            Condition::Matcher { env_key, .. }
            | Condition::Range { env_key, .. }
            | Condition::List { env_key, .. } => env_key,
        }
    }

    /// Evaluates the condition against `env`. A missing key, a value of the wrong
    /// type, or an invalid regex evaluates to `false`.
    pub fn evaluate(&self, env: &Map<String, Value>) -> bool {
        let Some(value) = env.get(self.env_key()) else {
            return false;
        };

        match self {
            Condition::Matcher {
                eval_function,
                eval_value,
                ..
            } => {
                let Some(text) = scalar_text(value) else {
                    return false;
                };
                match eval_function {
                    MatcherFunction::Equals => text == *eval_value,
                    MatcherFunction::Contains => text.contains(eval_value.as_str()),
                    MatcherFunction::StartsWith => text.starts_with(eval_value.as_str()),
                    MatcherFunction::EndsWith => text.ends_with(eval_value.as_str()),
                    MatcherFunction::Regex => Regex::new(eval_value)
                        .map(|re| re.is_match(&text))
                        .unwrap_or(false),
                }
            }
            Condition::Range {
                range_min,
                range_max,
                ..
            } => {
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                number.is_some_and(|n| n >= *range_min && n <= *range_max)
            }
            Condition::List { value_list, .. } => match scalar_text(value) {
                Some(text) => value_list.iter().any(|v| *v == text),
                None => false,
            },
        }
    }
}

/// Strings compare by content; numbers and booleans by their JSON rendering.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Example {
    pub input: Map<String, Value>,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStrategy {
    Local,
    Redis,
    Database,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub strategy: MemoryStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_position: Option<NodePosition>,
}

impl PromptMetadata {
    /// Overlays the fields set in `other` onto `self`. Timestamps are left alone.
    pub fn merge(&mut self, other: PromptMetadata) {
        if other.author.is_some() {
            self.author = other.author;
        }
        if other.description.is_some() {
            self.description = other.description;
        }
        if other.category.is_some() {
            self.category = other.category;
        }
        if other.labels.is_some() {
            self.labels = other.labels;
        }
        if other.flow_position.is_some() {
            self.flow_position = other.flow_position;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Provider configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Llama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Llama => "llama",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiSettings {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnthropicSettings {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlamaSettings {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

/// Model configuration attached to a prompt, keyed by `provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum LlmConfig {
    #[serde(rename = "openai")]
    OpenAi(OpenAiSettings),
    Anthropic(AnthropicSettings),
    Llama(LlamaSettings),
}

impl LlmConfig {
    pub fn provider(&self) -> LlmProvider {
        match self {
            LlmConfig::OpenAi(_) => LlmProvider::OpenAi,
            LlmConfig::Anthropic(_) => LlmProvider::Anthropic,
            LlmConfig::Llama(_) => LlmProvider::Llama,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmConfig::OpenAi(s) => &s.model,
            LlmConfig::Anthropic(s) => &s.model,
            LlmConfig::Llama(s) => &s.model,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        match self {
            LlmConfig::OpenAi(s) => s.temperature,
            LlmConfig::Anthropic(s) => s.temperature,
            LlmConfig::Llama(s) => s.temperature,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            LlmConfig::OpenAi(s) => s.api_key.as_deref(),
            LlmConfig::Anthropic(s) => s.api_key.as_deref(),
            LlmConfig::Llama(s) => s.api_key.as_deref(),
        }
    }

    /// Cache key for client instances: `provider-model-temperature`.
    pub fn instance_key(&self) -> String {
        let temperature = self
            .temperature()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "default".to_string());
        format!("{}-{}-{}", self.provider().as_str(), self.model(), temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_condition_deserializes_by_type_tag() {
        let condition: Condition = serde_json::from_value(json!({
            "type": "matcher",
            "envKey": "locale",
            "evalFunction": "startsWith",
            "evalValue": "en"
        }))
        .unwrap();
        assert_eq!(condition.env_key(), "locale");
        assert!(condition.evaluate(&env(json!({ "locale": "en-GB" }))));
        assert!(!condition.evaluate(&env(json!({ "locale": "fr-FR" }))));
    }

    #[test]
    fn test_range_condition_is_inclusive_and_accepts_numeric_strings() {
        let condition = Condition::Range {
            env_key: "age".to_string(),
            range_min: 18.0,
            range_max: 65.0,
        };
        assert!(condition.evaluate(&env(json!({ "age": 18 }))));
        assert!(condition.evaluate(&env(json!({ "age": "65" }))));
        assert!(!condition.evaluate(&env(json!({ "age": 66 }))));
        assert!(!condition.evaluate(&env(json!({ "age": true }))));
    }

    #[test]
    fn test_missing_key_and_bad_regex_are_false() {
        let regex = Condition::Matcher {
            env_key: "q".to_string(),
            eval_function: MatcherFunction::Regex,
            eval_value: "([".to_string(),
        };
        assert!(!regex.evaluate(&env(json!({ "q": "anything" }))));
        assert!(!regex.evaluate(&env(json!({}))));
    }

    #[test]
    fn test_active_tags_include_matching_dynamic_tags() {
        let prompt: Prompt = serde_json::from_value(json!({
            "id": "greet",
            "version": "v1",
            "name": "Greet",
            "content": "Hello {{name}}",
            "staticTags": ["greeting"],
            "dynamicTags": [{
                "tag": { "name": "vip", "type": "dynamic" },
                "condition": { "type": "list", "envKey": "tier", "valueList": ["gold", "platinum"] }
            }],
            "conditions": [],
            "supportedLanguages": ["en"]
        }))
        .unwrap();

        assert_eq!(
            prompt.active_tags(&env(json!({ "tier": "gold" }))),
            vec!["greeting".to_string(), "vip".to_string()]
        );
        assert_eq!(
            prompt.active_tags(&env(json!({ "tier": "bronze" }))),
            vec!["greeting".to_string()]
        );
    }

    #[test]
    fn test_llm_config_is_keyed_by_provider() {
        let config: LlmConfig = serde_json::from_value(json!({
            "provider": "openai",
            "model": "gpt-4o",
            "temperature": 0.2
        }))
        .unwrap();
        assert_eq!(config.provider(), LlmProvider::OpenAi);
        assert_eq!(config.model(), "gpt-4o");
        assert_eq!(config.instance_key(), "openai-gpt-4o-0.2");

        let llama: Result<LlmConfig, _> = serde_json::from_value(json!({
            "provider": "llama",
            "model": "llama-3"
        }));
        assert!(llama.is_err(), "llama config requires modelPath");
    }
}
