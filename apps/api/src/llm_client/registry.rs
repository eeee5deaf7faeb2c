use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Client;
use tracing::{debug, info};

use super::anthropic::AnthropicClient;
use super::openai::OpenAiClient;
use super::{build_http_client, ClientProvider, GenerationClient, GenerationError};
use crate::models::prompt::LlmConfig;

/// Fallback API keys used when a prompt config does not carry its own.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

#[derive(Default)]
struct Slots {
    clients: HashMap<String, Arc<dyn GenerationClient>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// Bounded cache of generation clients keyed by `provider-model-temperature`.
///
/// Owned by `AppState`; when full, the oldest client is evicted.
pub struct ClientRegistry {
    http: Client,
    keys: ProviderKeys,
    capacity: usize,
    slots: Mutex<Slots>,
}

impl ClientRegistry {
    pub fn new(keys: ProviderKeys, capacity: usize) -> Result<Self, GenerationError> {
        Ok(Self {
            http: build_http_client()?,
            keys,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots::default()),
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self, config: &LlmConfig) -> Result<Arc<dyn GenerationClient>, GenerationError> {
        let provider = config.provider().as_str();
        match config {
            LlmConfig::OpenAi(settings) => {
                let api_key = resolve_key(config, self.keys.openai.as_deref(), provider)?;
                Ok(Arc::new(OpenAiClient::new(
                    self.http.clone(),
                    api_key,
                    settings.clone(),
                )))
            }
            LlmConfig::Anthropic(settings) => {
                let api_key = resolve_key(config, self.keys.anthropic.as_deref(), provider)?;
                Ok(Arc::new(AnthropicClient::new(
                    self.http.clone(),
                    api_key,
                    settings.clone(),
                )))
            }
            LlmConfig::Llama(_) => Err(GenerationError::UnsupportedProvider(provider.to_string())),
        }
    }
}

fn resolve_key(
    config: &LlmConfig,
    fallback: Option<&str>,
    provider: &str,
) -> Result<String, GenerationError> {
    config
        .api_key()
        .or(fallback)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GenerationError::MissingApiKey(provider.to_string()))
}

impl ClientProvider for ClientRegistry {
    fn client_for(&self, config: &LlmConfig) -> Result<Arc<dyn GenerationClient>, GenerationError> {
        let key = config.instance_key();
        let mut slots = self.lock();

        if let Some(client) = slots.clients.get(&key) {
            debug!("Reusing LLM client {key}");
            return Ok(Arc::clone(client));
        }

        let client = self.build(config)?;

        while slots.clients.len() >= self.capacity {
            let Some(oldest) = slots.order.pop_front() else {
                break;
            };
            slots.clients.remove(&oldest);
            debug!("Evicted LLM client {oldest}");
        }

        slots.clients.insert(key.clone(), Arc::clone(&client));
        slots.order.push_back(key.clone());
        info!("Created LLM client {key}");

        Ok(client)
    }

    fn reset(&self, config: &LlmConfig) -> bool {
        let key = config.instance_key();
        let mut slots = self.lock();
        slots.order.retain(|k| *k != key);
        let removed = slots.clients.remove(&key).is_some();
        if removed {
            info!("Reset LLM client {key}");
        }
        removed
    }
}
