//! Ollama embedding provider
//!
//! Ollama's `/api/embeddings` takes one prompt per request, so a batch is a
//! run of sequential requests. Batching and pacing still go through the
//! shared helper.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::embedding::{
    embed_in_batches, retry_request, truncate_chars, BatchPolicy, EmbeddingProvider, RequestError,
};

/// Ollama embedding provider using nomic-embed-text or similar models
pub struct OllamaEmbedder {
    client: OnceCell<Client>,
    base_url: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    max_retries: u32,
    policy: BatchPolicy,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: OnceCell::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            policy: BatchPolicy::from_config(config),
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client.get_or_try_init(|| {
            Ok(Client::builder()
                .timeout(self.timeout)
                .pool_max_idle_per_host(5)
                .build()?)
        })
    }

    /// Embed one already-truncated text with retry
    async fn request_one(&self, text: &str) -> Result<Vec<f32>> {
        let client = self.client()?;
        let url = format!("{}/api/embeddings", self.base_url);

        retry_request(self.name(), self.max_retries, || {
            let url = &url;
            async move {
                let request = EmbedRequest {
                    model: &self.model,
                    prompt: text,
                };

                let response = client
                    .post(url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| RequestError::from_reqwest("Embedding request failed", e))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(RequestError::from_status(status, &body));
                }

                let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                    RequestError::fatal(Error::embedding(format!(
                        "Failed to parse embedding response: {}",
                        e
                    )))
                })?;

                Ok(embed_response.embedding)
            }
        })
        .await
    }

    async fn request_batch(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(inputs.len());
        for text in &inputs {
            embeddings.push(self.request_one(text).await?);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request_one(truncate_chars(text, self.policy.max_input_chars))
            .await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(&self.policy, texts, |batch| self.request_batch(batch)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client()?.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
