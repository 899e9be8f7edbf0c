//! OpenAI-compatible embeddings client

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::embedding::{
    embed_in_batches, retry_request, truncate_chars, BatchPolicy, EmbeddingProvider, RequestError,
};

/// Embeddings client for `/embeddings` endpoints (one request per batch)
pub struct OpenAiEmbedder {
    /// Built on first request
    client: OnceCell<Client>,
    api_key: String,
    base_url: String,
    endpoint: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    max_retries: u32,
    policy: BatchPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedder {
    /// Create an embedder; fails when no API key is configured
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| Error::Config("missing OpenAI API key (set OPENAI_API_KEY)".to_string()))?;
        if config.model.trim().is_empty() {
            return Err(Error::Config("missing embedding model name".to_string()));
        }

        Ok(Self {
            client: OnceCell::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            policy: BatchPolicy::from_config(config),
        })
    }

    fn client(&self) -> Result<&Client> {
        self.client.get_or_try_init(|| {
            let mut headers = HeaderMap::new();
            let auth = format!("Bearer {}", self.api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| Error::Config("invalid OpenAI API key".to_string()))?,
            );
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

            tracing::debug!("Building OpenAI HTTP client for {}", self.endpoint);
            Ok(Client::builder()
                .timeout(self.timeout)
                .default_headers(headers)
                .pool_max_idle_per_host(5)
                .build()?)
        })
    }

    /// Send one batch; inputs must already be truncated
    async fn request_batch(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let client = self.client()?;
        let expected = inputs.len();

        retry_request(self.name(), self.max_retries, || {
            let inputs = &inputs;
            async move {
                let request = EmbeddingRequest {
                    model: &self.model,
                    input: inputs,
                };
                let response = client
                    .post(&self.endpoint)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| RequestError::from_reqwest("Embedding request failed", e))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    return Err(RequestError::from_status(status, &body));
                }

                let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                    RequestError::fatal(Error::embedding(format!(
                        "Failed to parse embedding response: {}",
                        e
                    )))
                })?;
                parsed.data.sort_by_key(|entry| entry.index);
                if parsed.data.len() != expected {
                    return Err(RequestError::fatal(Error::embedding(format!(
                        "OpenAI returned {} embeddings for {} inputs",
                        parsed.data.len(),
                        expected
                    ))));
                }

                Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
            }
        })
        .await
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = truncate_chars(text, self.policy.max_input_chars).to_string();
        self.request_batch(vec![input])
            .await?
            .pop()
            .ok_or_else(|| Error::embedding("OpenAI returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(&self.policy, texts, |batch| self.request_batch(batch)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        match self.client()?.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}
