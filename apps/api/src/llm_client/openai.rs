use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{send_with_retries, template, Generation, GenerationClient, GenerationError};
use crate::eval::tokens::usage_for;
use crate::models::eval::TokenUsage;
use crate::models::prompt::OpenAiSettings;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// OpenAI Chat Completions client bound to one prompt configuration.
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    settings: OpenAiSettings,
}

impl OpenAiClient {
    pub fn new(http: Client, api_key: String, settings: OpenAiSettings) -> Self {
        Self {
            http,
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            settings,
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            presence_penalty: self.settings.presence_penalty,
            frequency_penalty: self.settings.frequency_penalty,
            top_p: self.settings.top_p,
        }
    }
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    async fn generate(
        &self,
        template: &str,
        variables: &Map<String, Value>,
    ) -> Result<Generation, GenerationError> {
        let prompt = template::render(template, variables)?;
        let body = self.request_body(&prompt);
        let url = format!("{}/chat/completions", self.base_url);

        let response = send_with_retries(|| {
            self.http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .ok_or(GenerationError::EmptyContent)?;

        let usage = match parsed.usage {
            Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
            None => usage_for(&prompt, &text),
        };

        debug!(
            "OpenAI call succeeded: model={}, prompt_tokens={}, completion_tokens={}",
            self.settings.model, usage.prompt_tokens, usage.completion_tokens
        );

        Ok(Generation { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_omits_unset_options() {
        let settings = OpenAiSettings {
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.0),
            max_tokens: Some(256),
            api_key: None,
            presence_penalty: None,
            frequency_penalty: None,
            top_p: None,
        };
        let client = OpenAiClient::new(Client::new(), "key".to_string(), settings);
        let body = serde_json::to_value(client.request_body("Hi Ann")).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["messages"][0]["content"], "Hi Ann");
        assert!(body.get("presence_penalty").is_none());
    }

    #[test]
    fn test_chat_response_parses_choice_and_usage() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{
                "choices": [{"message": {"role": "assistant", "content": "Hi Ann"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi Ann"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, 2);
    }
}
