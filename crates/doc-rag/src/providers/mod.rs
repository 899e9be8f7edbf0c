//! Provider abstractions for embeddings and vector storage
//!
//! Trait-based seams so the pipeline can switch between hosted (OpenAI),
//! local (Ollama) and test backends.

pub mod embedding;
pub mod memory;
pub mod ollama;
pub mod openai;
pub mod sqlite;
pub mod vector_store;

use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::Result;

pub use embedding::{embed_in_batches, truncate_chars, BatchPolicy, EmbeddingProvider};
pub use memory::InMemoryVectorStore;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use sqlite::SqliteVectorStore;
pub use vector_store::VectorStoreProvider;

static SHARED_EMBEDDER: OnceCell<Arc<dyn EmbeddingProvider>> = OnceCell::new();

/// Construct the embedding provider selected by configuration
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(config)?),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(config)),
    };
    tracing::info!(
        "Using {} embeddings ({}, {} dims)",
        embedder.name(),
        config.model,
        config.dimensions
    );
    Ok(embedder)
}

/// Process-wide embedding handle, built from `config` on first use.
///
/// Later calls return the same handle and ignore their argument.
pub fn shared_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    SHARED_EMBEDDER
        .get_or_try_init(|| build_embedder(config))
        .map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_embedder_is_reused() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Ollama,
            base_url: "http://127.0.0.1:9".to_string(),
            dimensions: 768,
            ..Default::default()
        };
        let first = shared_embedder(&config).unwrap();
        let second = shared_embedder(&EmbeddingConfig::default()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.dimensions(), 768);
    }

    #[test]
    fn test_build_embedder_selects_backend() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Ollama,
            ..Default::default()
        };
        assert_eq!(build_embedder(&config).unwrap().name(), "ollama");
    }
}
