//! Embedding provider implementations.
//!
//! The [`EmbeddingProvider`] trait itself lives in the core crate. This
//! module supplies the network backends and the factory:
//!
//! - **`hashing`**: [`HashingEmbedder`], offline and deterministic.
//! - **`ollama`**: [`OllamaEmbedder`], `POST {base_url}/api/embed`.
//! - **`openai`**: [`OpenAIEmbedder`], `POST /v1/embeddings`; needs
//!   `OPENAI_API_KEY`.
//!
//! Network backends retry transient failures (see [`crate::retry`]).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use fraud_assist_core::embedding::{EmbeddingProvider, HashingEmbedder};
use fraud_assist_core::error::{CoreError, CoreResult};

use crate::config::EmbeddingConfig;
use crate::retry::{post_json, RetryPolicy};

// ============ Ollama Provider ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/api/embed", config.base_url.trim_end_matches('/')),
            model,
            dims,
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(&self.client, &self.url, None, &body, self.retry)
            .await
            .map_err(|e| unavailable("ollama", e))?;
        parse_vectors(json.get("embeddings"), None).map_err(|e| unavailable("ollama", e))
    }
}

// ============ OpenAI Provider ============

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    /// Fails if `model` or `dims` is unset or `OPENAI_API_KEY` is missing.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            dims,
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            OPENAI_EMBEDDINGS_URL,
            Some(&self.api_key),
            &body,
            self.retry,
        )
        .await
        .map_err(|e| unavailable("openai", e))?;
        parse_vectors(json.get("data"), Some("embedding")).map_err(|e| unavailable("openai", e))
    }
}

fn unavailable(provider: &str, e: anyhow::Error) -> CoreError {
    CoreError::EmbeddingUnavailable {
        target: provider.to_string(),
        reason: format!("{:#}", e),
    }
}

/// Read an array of vectors. With `field`, each item is an object holding
/// its vector under that key (OpenAI); otherwise items are bare arrays.
fn parse_vectors(value: Option<&serde_json::Value>, field: Option<&str>) -> Result<Vec<Vec<f32>>> {
    let items = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("invalid embedding response: missing vector array"))?;

    let mut vectors = Vec::with_capacity(items.len());
    for item in items {
        let raw = match field {
            Some(key) => item.get(key),
            None => Some(item),
        };
        let raw = raw
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid embedding response: missing embedding"))?;
        vectors.push(raw.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect());
    }
    Ok(vectors)
}

/// Create the [`EmbeddingProvider`] named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hashing"` | [`HashingEmbedder`] (`dims` defaults to 1024) |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(match config.dims {
            Some(dims) => HashingEmbedder::new(dims),
            None => HashingEmbedder::default(),
        })),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
