use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    send_with_retries, template, Generation, GenerationClient, GenerationError,
    DEFAULT_MAX_TOKENS,
};
use crate::eval::tokens::usage_for;
use crate::models::eval::TokenUsage;
use crate::models::prompt::AnthropicSettings;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl AnthropicResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

/// Anthropic Messages API client bound to one prompt configuration.
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    settings: AnthropicSettings,
}

impl AnthropicClient {
    pub fn new(http: Client, api_key: String, settings: AnthropicSettings) -> Self {
        Self {
            http,
            api_key,
            settings,
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.settings.temperature,
            top_k: self.settings.top_k,
            top_p: self.settings.top_p,
        }
    }
}

#[async_trait]
impl GenerationClient for AnthropicClient {
    async fn generate(
        &self,
        template: &str,
        variables: &Map<String, Value>,
    ) -> Result<Generation, GenerationError> {
        let prompt = template::render(template, variables)?;
        let body = self.request_body(&prompt);

        let response = send_with_retries(|| {
            self.http
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
        })
        .await?;

        let parsed: AnthropicResponse = response.json().await?;
        let text = parsed.text().ok_or(GenerationError::EmptyContent)?.to_string();

        let usage = match &parsed.usage {
            Some(u) => TokenUsage::new(u.input_tokens, u.output_tokens),
            None => usage_for(&prompt, &text),
        };

        debug!(
            "Anthropic call succeeded: model={}, input_tokens={}, output_tokens={}",
            self.settings.model, usage.prompt_tokens, usage.completion_tokens
        );

        Ok(Generation { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AnthropicSettings {
        AnthropicSettings {
            model: "claude-3-5-sonnet".to_string(),
            temperature: Some(0.3),
            max_tokens: None,
            api_key: None,
            top_k: None,
            top_p: Some(0.9),
        }
    }

    #[test]
    fn test_request_body_applies_settings() {
        let client = AnthropicClient::new(Client::new(), "key".to_string(), settings());
        let body = serde_json::to_value(client.request_body("Hello Ann")).unwrap();

        assert_eq!(body["model"], "claude-3-5-sonnet");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello Ann");
        assert_eq!(body["top_p"], 0.9);
        assert!(body.get("top_k").is_none());
    }

    #[test]
    fn test_response_text_picks_first_text_block() {
        let response: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "tool_use"},
                    {"type": "text", "text": "Hello Ann"}
                ],
                "usage": {"input_tokens": 3, "output_tokens": 2}
            }"#,
        )
        .unwrap();
        assert_eq!(response.text(), Some("Hello Ann"));
        assert_eq!(response.usage.unwrap().output_tokens, 2);
    }
}
