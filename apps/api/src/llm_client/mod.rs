//! LLM Client — every provider call in the service goes through this module.
//!
//! The evaluation core only sees [`GenerationClient`] and [`ClientProvider`].
//! Provider wire formats, API keys, and transport retries stay in here.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::models::eval::TokenUsage;
use crate::models::prompt::LlmConfig;

pub mod anthropic;
pub mod handlers;
pub mod openai;
pub mod registry;
pub mod template;

pub use registry::ClientRegistry;

/// Default completion budget when a prompt config does not set `maxTokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Missing value for template variable '{0}'")]
    MissingVariable(String),

    #[error("Unsupported LLM provider: {0}")]
    UnsupportedProvider(String),

    #[error("No API key configured for provider {0}")]
    MissingApiKey(String),
}

/// Generated text plus the tokens it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Renders a prompt template with variables and runs it through a model.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        template: &str,
        variables: &Map<String, Value>,
    ) -> Result<Generation, GenerationError>;
}

/// Hands out a [`GenerationClient`] for a prompt's model configuration.
pub trait ClientProvider: Send + Sync {
    fn client_for(&self, config: &LlmConfig) -> Result<Arc<dyn GenerationClient>, GenerationError>;

    /// Drops any cached client for `config`. Returns whether one was cached.
    fn reset(&self, _config: &LlmConfig) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

/// Sends the request built by `build`, retrying on 429 and 5xx with exponential
/// backoff (1s, 2s). Other non-success statuses fail immediately.
pub(crate) async fn send_with_retries<F>(build: F) -> Result<Response, GenerationError>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error: Option<GenerationError> = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
            warn!(
                "LLM call attempt {} failed, retrying after {}ms...",
                attempt,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(GenerationError::Http(e));
                continue;
            }
        };

        let status = response.status();

        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM API returned {}: {}", status, body);
            last_error = Some(GenerationError::Api {
                status: status.as_u16(),
                message: body,
            });
            continue;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: provider_error_message(body),
            });
        }

        return Ok(response);
    }

    Err(last_error.unwrap_or(GenerationError::RateLimited {
        retries: MAX_RETRIES,
    }))
}

/// Both Anthropic and OpenAI wrap failures as `{"error": {"message": ...}}`.
fn provider_error_message(body: String) -> String {
    serde_json::from_str::<ProviderError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

pub(crate) fn build_http_client() -> Result<Client, GenerationError> {
    Ok(Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_message_extracts_nested_message() {
        let body = r#"{"error": {"type": "invalid_request_error", "message": "bad model"}}"#;
        assert_eq!(provider_error_message(body.to_string()), "bad model");
    }

    #[test]
    fn test_provider_error_message_falls_back_to_body() {
        assert_eq!(
            provider_error_message("upstream exploded".to_string()),
            "upstream exploded"
        );
    }
}
