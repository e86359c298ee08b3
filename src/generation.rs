//! Generation provider implementations.
//!
//! - **`extractive`**: the core [`ExtractiveGenerator`], offline.
//! - **`ollama`**: [`OllamaGenerator`], `POST {base_url}/api/chat` with
//!   `stream: false`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use fraud_assist_core::error::{CoreError, CoreResult};
use fraud_assist_core::generation::{ExtractiveGenerator, GenerationContext, Generator};

use crate::config::GenerationConfig;
use crate::retry::{post_json, RetryPolicy};

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f64,
    top_p: f64,
    num_predict: u32,
    retry: RetryPolicy,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            num_predict: config.num_predict,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "stream": false,
            "format": "json",
            "options": {
                "temperature": self.temperature,
                "top_p": self.top_p,
                "num_predict": self.num_predict,
            },
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _ctx: &GenerationContext,
    ) -> CoreResult<String> {
        let body = self.request_body(system_prompt, user_prompt);
        let json = post_json(&self.client, &self.url, None, &body, self.retry)
            .await
            .map_err(|e| CoreError::Generation(format!("ollama: {:#}", e)))?;
        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::Generation("ollama: response has no message content".into()))
    }
}

/// Create the [`Generator`] named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator)),
        "ollama" => Ok(Arc::new(
            OllamaGenerator::new(config).map_err(|e| anyhow!("ollama generator: {}", e))?,
        )),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::test_support::serve;
    use serde_json::json;

    fn config(base_url: &str) -> GenerationConfig {
        GenerationConfig {
            provider: "ollama".to_string(),
            base_url: base_url.to_string(),
            max_retries: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_request_body() {
        let g = OllamaGenerator::new(&GenerationConfig::default()).unwrap();
        let body = g.request_body("sys", "user");
        assert_eq!(body["model"], "mistral");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert_eq!(body["options"]["num_predict"], 2048);
        assert_eq!(g.url, "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_create_generator() {
        assert_eq!(
            create_generator(&GenerationConfig::default()).unwrap().name(),
            "extractive"
        );
        let unknown = GenerationConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        assert!(create_generator(&unknown).is_err());
    }

    #[tokio::test]
    async fn test_ollama_chat_content() {
        let server = serve(
            "/api/chat",
            vec![(
                200,
                json!({"message": {"role": "assistant", "content": "{\"customer_message\": \"ok\"}"}, "done": true}),
            )],
        )
        .await;
        let base = server.url.trim_end_matches("/api/chat").to_string();
        let g = OllamaGenerator::new(&config(&base)).unwrap();
        let out = g
            .generate("sys", "user", &GenerationContext::default())
            .await
            .unwrap();
        assert_eq!(out, "{\"customer_message\": \"ok\"}");
    }

    #[tokio::test]
    async fn test_ollama_missing_content_is_generation_error() {
        let server = serve("/api/chat", vec![(200, json!({"done": true}))]).await;
        let base = server.url.trim_end_matches("/api/chat").to_string();
        let g = OllamaGenerator::new(&config(&base)).unwrap();
        let err = g
            .generate("sys", "user", &GenerationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Generation(_)));
    }
}
