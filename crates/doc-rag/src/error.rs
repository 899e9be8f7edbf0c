//! Error types for the retrieval pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Chunker or pipeline parameters violate their constraints
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or provider failure while generating embeddings
    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// Stored and query vectors disagree on dimensionality
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Similarity is undefined for a zero-magnitude vector
    #[error("Cosine similarity undefined for zero-magnitude vector")]
    ZeroMagnitude,

    /// A vector holds NaN or infinite components
    #[error("Cosine similarity undefined for non-finite vector")]
    NonFiniteVector,

    /// Server-side vector search failed or no index is configured
    #[error("Vector search unavailable: {0}")]
    VectorSearchUnavailable(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create an embedding provider error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingProvider(message.into())
    }

    /// Create a vector search unavailable error
    pub fn search_unavailable(message: impl Into<String>) -> Self {
        Self::VectorSearchUnavailable(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the exact in-process scan may stand in for a failed index search.
    ///
    /// Every search failure is recovered except the ones that make cosine
    /// similarity itself undefined; the scan would hit those too.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        !matches!(
            self,
            Self::DimensionMismatch { .. } | Self::ZeroMagnitude | Self::NonFiniteVector
        )
    }
}
