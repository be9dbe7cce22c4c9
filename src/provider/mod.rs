// src/provider/mod.rs — Reasoning and embedding service layer

pub mod embedder;
pub mod openai_compat;
pub mod retry;

use async_trait::async_trait;
use std::sync::Arc;

use crate::infra::config::{EmbeddingConfig, EmbeddingProviderKind, ReasoningConfig};
use crate::infra::errors::PlanCraftError;

/// External model that returns JSON conforming to a supplied schema.
/// Its output is untrusted: callers always validate it.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn id(&self) -> &str;

    async fn generate_structured(
        &self,
        prompt: &str,
        output_schema: &serde_json::Value,
    ) -> Result<serde_json::Value, PlanCraftError>;
}

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn id(&self) -> &str;
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanCraftError>;
}

/// Build the configured reasoning client, wrapped with retries.
pub fn build_reasoner(config: &ReasoningConfig) -> anyhow::Result<Arc<dyn ReasoningService>> {
    let api_key = read_api_key(&config.api_key_env)?;
    let inner: Arc<dyn ReasoningService> = Arc::new(openai_compat::OpenAICompatReasoner::new(
        api_key,
        config.base_url.clone(),
        config.model.clone(),
        config.temperature,
        config.max_tokens,
    ));
    Ok(Arc::new(retry::RetryReasoner::with_policy(
        inner,
        config.retry.to_policy(),
    )))
}

/// Build the configured embedder. The OpenAI embedder reuses the reasoning endpoint and key.
pub fn build_embedder(
    config: &EmbeddingConfig,
    reasoning: &ReasoningConfig,
) -> anyhow::Result<Arc<dyn EmbeddingService>> {
    match config.provider {
        EmbeddingProviderKind::Hashing => {
            Ok(Arc::new(embedder::HashingEmbedder::new(config.dimensions)))
        }
        EmbeddingProviderKind::Openai => {
            let api_key = read_api_key(&reasoning.api_key_env)?;
            Ok(Arc::new(openai_compat::OpenAIEmbedder::new(
                api_key,
                reasoning.base_url.clone(),
                config.model.clone(),
                config.dimensions,
            )))
        }
    }
}

fn read_api_key(var: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(PlanCraftError::Config(format!("environment variable {var} is not set")).into()),
    }
}
