mod config;
mod errors;
mod eval;
mod llm_client;
mod models;
mod prompts;
mod routes;
mod state;
mod storage;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, S3Config, StorageConfig};
use crate::eval::cost::CostTable;
use crate::eval::validation::CustomRuleRegistry;
use crate::llm_client::registry::ProviderKeys;
use crate::llm_client::ClientRegistry;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{BlobPromptStore, MemoryBlobStore, PromptStore, S3BlobStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Prompt API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize prompt storage
    let store: Arc<dyn PromptStore> = match &config.storage {
        StorageConfig::S3(s3) => {
            let client = build_s3_client(s3).await;
            info!("S3 prompt store initialized (bucket: {})", s3.bucket);
            Arc::new(BlobPromptStore::new(S3BlobStore::new(client, s3.bucket.clone())))
        }
        StorageConfig::Memory => {
            warn!("Using in-memory prompt store; prompts are lost on restart");
            Arc::new(BlobPromptStore::new(MemoryBlobStore::default()))
        }
    };

    // Initialize LLM client registry
    let clients = ClientRegistry::new(
        ProviderKeys {
            openai: config.openai_api_key.clone(),
            anthropic: config.anthropic_api_key.clone(),
        },
        config.llm_client_cache_size,
    )?;
    info!(
        "LLM client registry initialized (capacity: {})",
        config.llm_client_cache_size
    );

    let costs = config
        .model_rates
        .iter()
        .fold(CostTable::default(), |table, (model, rate)| {
            info!(
                "Model rate override: {model} = {}/{} per 1K tokens",
                rate.prompt_per_1k, rate.completion_per_1k
            );
            table.with_rate(model.clone(), *rate)
        });

    let custom_rules = CustomRuleRegistry::with_builtins();
    info!("Custom validation rules: {}", custom_rules.names().join(", "));

    // Build app state
    let state = AppState {
        store,
        clients: Arc::new(clients),
        costs: Arc::new(costs),
        custom_rules: Arc::new(custom_rules),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client for AWS, or for MinIO when a custom endpoint is set.
async fn build_s3_client(config: &S3Config) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));

    if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            key_id,
            secret,
            None,
            None,
            "prompt-api-static",
        ));
    }

    let shared = loader.load().await;
    let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
    if let Some(endpoint) = &config.endpoint {
        // MinIO serves buckets under the path, not as subdomains.
        s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(s3_config.build())
}
