//! Embedding provider trait and the batching discipline shared by providers

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Trait for generating text embeddings
///
/// Implementations:
/// - `OpenAiEmbedder`: OpenAI-compatible `/embeddings` endpoint
/// - `OllamaEmbedder`: Local Ollama server
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text (one request, not batched)
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for many texts.
    ///
    /// `output[i]` corresponds to `texts[i]`. Any failed batch fails the
    /// whole call; no partial results are returned.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality produced by the model
    fn dimensions(&self) -> usize;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// How texts are grouped and paced when sent to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Maximum texts per request
    pub batch_size: usize,
    /// Per-text character ceiling
    pub max_input_chars: usize,
    /// Pause between consecutive batches
    pub delay: Duration,
}

impl BatchPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_input_chars: config.max_input_chars,
            delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

/// Cut a text to at most `max_chars` characters.
///
/// Lossy: the tail beyond the ceiling never reaches the provider and is not
/// represented in the embedding.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Run `request` over `texts` in sequential batches.
///
/// Each text is truncated to the policy's character ceiling, batches never
/// exceed `batch_size`, and the delay is observed between batches but not
/// after the last one. The first failing batch aborts the call.
pub async fn embed_in_batches<F, Fut>(
    policy: &BatchPolicy,
    texts: &[String],
    mut request: F,
) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>>>,
{
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = policy.batch_size.max(1);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut embeddings = Vec::with_capacity(texts.len());

    for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
        let inputs: Vec<String> = batch
            .iter()
            .map(|t| truncate_chars(t, policy.max_input_chars).to_string())
            .collect();

        tracing::debug!(
            "Embedding batch {}/{} ({} texts)",
            batch_idx + 1,
            total_batches,
            inputs.len()
        );

        let vectors = request(inputs).await?;
        if vectors.len() != batch.len() {
            return Err(Error::embedding(format!(
                "Provider returned {} embeddings for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }
        embeddings.extend(vectors);

        if batch_idx + 1 < total_batches && !policy.delay.is_zero() {
            sleep(policy.delay).await;
        }
    }

    Ok(embeddings)
}

/// A failed request attempt, tagged with whether it is worth repeating
#[derive(Debug)]
pub(crate) struct RequestError {
    error: Error,
    retryable: bool,
}

impl RequestError {
    pub(crate) fn transient(error: Error) -> Self {
        Self { error, retryable: true }
    }

    pub(crate) fn fatal(error: Error) -> Self {
        Self { error, retryable: false }
    }

    /// Classify an HTTP status: rate limits and server errors are transient
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let error = Error::embedding(format!("HTTP {}: {}", status, body));
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::transient(error)
        } else {
            Self::fatal(error)
        }
    }

    /// Classify a transport error
    pub(crate) fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
        let error = Error::embedding(format!("{}: {}", context, err));
        Self { error, retryable }
    }
}

/// Backoff before retry `attempt` (1-based): 500ms doubling, capped at 16s
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1u64 << attempt.min(5)))
}

/// Retry a request with exponential backoff
pub(crate) async fn retry_request<F, Fut, T>(
    provider: &str,
    max_retries: u32,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, RequestError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.retryable && attempt < max_retries => {
                attempt += 1;
                let delay = retry_backoff(attempt);
                tracing::warn!(
                    "{} request failed (attempt {}/{}), retrying in {:?}: {}",
                    provider,
                    attempt,
                    max_retries + 1,
                    delay,
                    e.error
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e.error),
        }
    }
}
