use anyhow::{bail, Context, Result};

use crate::eval::cost::ModelRate;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_CLIENT_CACHE_SIZE: usize = 32;

/// Where prompt documents live.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    S3(S3Config),
    /// Process-local; prompts are lost on restart.
    Memory,
}

impl StorageConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::S3(_) => "s3",
            StorageConfig::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct S3Config {
    pub bucket: String,
    /// Custom endpoint for MinIO and other S3-compatible stores.
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials. When unset the default AWS provider chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Maximum number of cached generation clients.
    pub llm_client_cache_size: usize,
    /// Extra or overriding per-1K rates, applied on top of the built-in table.
    pub model_rates: Vec<(String, ModelRate)>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = get("STORAGE_BACKEND").unwrap_or_else(|| "s3".to_string());
        let storage = match backend.to_ascii_lowercase().as_str() {
            "s3" => StorageConfig::S3(S3Config {
                bucket: require(&get, "S3_BUCKET")?,
                endpoint: get("S3_ENDPOINT"),
                region: get("S3_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                access_key_id: get("AWS_ACCESS_KEY_ID"),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
            }),
            "memory" => StorageConfig::Memory,
            other => bail!("STORAGE_BACKEND must be 's3' or 'memory', got '{other}'"),
        };

        Ok(Config {
            storage,
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            llm_client_cache_size: get("LLM_CLIENT_CACHE_SIZE")
                .map(|v| v.parse::<usize>())
                .transpose()
                .context("LLM_CLIENT_CACHE_SIZE must be a positive integer")?
                .unwrap_or(DEFAULT_CLIENT_CACHE_SIZE),
            model_rates: get("MODEL_RATES")
                .map(|v| parse_model_rates(&v))
                .transpose()?
                .unwrap_or_default(),
            port: get("PORT")
                .map(|v| v.parse::<u16>())
                .transpose()
                .context("PORT must be a valid port number")?
                .unwrap_or(DEFAULT_PORT),
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Parses `model=prompt_per_1k:completion_per_1k` entries separated by commas,
/// e.g. `house-model=0.002:0.004,gpt-4o=0.0025:0.01`.
fn parse_model_rates(raw: &str) -> Result<Vec<(String, ModelRate)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<(String, ModelRate)> {
            let invalid = || format!("MODEL_RATES entry '{entry}' must look like model=0.01:0.03");
            let (model, prices) = entry.split_once('=').with_context(invalid)?;
            let (prompt, completion) = prices.split_once(':').with_context(invalid)?;
            let model = model.trim();
            if model.is_empty() {
                bail!(invalid());
            }
            let prompt: f64 = prompt.trim().parse().with_context(invalid)?;
            let completion: f64 = completion.trim().parse().with_context(invalid)?;
            if ![prompt, completion].iter().all(|p| p.is_finite() && *p >= 0.0) {
                bail!(invalid());
            }
            Ok((model.to_string(), ModelRate::new(prompt, completion)))
        })
        .collect()
}

fn require(get: impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
