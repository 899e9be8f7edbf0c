//! Vector store provider trait for storing and searching chunk embeddings

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Chunk, DocumentType, EmbeddingRecord, PageFilter, RetrievalResult};

/// Trait for vector storage and similarity search
///
/// Implementations:
/// - `InMemoryVectorStore`: exact search over records held in memory
/// - `SqliteVectorStore`: durable records in SQLite, no server-side index
///
/// Writes and deletes for one document must not interleave; callers
/// serialize them per document.
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Store one record per chunk.
    ///
    /// `chunks` and `embeddings` must have the same length, and every
    /// embedding must match the store's established dimensionality.
    async fn write(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        document_type: DocumentType,
    ) -> Result<usize>;

    /// Server-side nearest-neighbor search restricted to one document.
    ///
    /// Returns up to `top_k` results, best first, drawn only from `pages`
    /// when a filter is given. Fails with `VectorSearchUnavailable` when no
    /// index can serve the query.
    async fn search(
        &self,
        query_embedding: &[f32],
        document_id: Uuid,
        top_k: usize,
        pages: Option<&PageFilter>,
    ) -> Result<Vec<RetrievalResult>>;

    /// Every record stored for a document, in chunk order
    async fn records(&self, document_id: Uuid) -> Result<Vec<EmbeddingRecord>>;

    /// Remove every record for a document; returns how many were removed
    async fn delete_all(&self, document_id: Uuid) -> Result<usize>;

    /// Established embedding dimensionality, once anything has been written
    async fn dimensions(&self) -> Result<Option<usize>>;

    /// Total number of records stored
    async fn len(&self) -> Result<usize>;

    /// Check if store is empty
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Whether `search` is approximate and should be over-fetched
    fn supports_approximate_search(&self) -> bool;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Validate a write batch against the established dimensionality.
///
/// Returns the batch dimensionality (or `established` for an empty batch).
pub(crate) fn check_write(
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    established: Option<usize>,
) -> Result<Option<usize>> {
    if chunks.len() != embeddings.len() {
        return Err(Error::internal(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }

    let mut expected = established;
    for embedding in embeddings {
        match expected {
            Some(dims) if dims != embedding.len() => {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    actual: embedding.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(embedding.len()),
        }
    }
    Ok(expected)
}

/// Fail when a query vector disagrees with the store's dimensionality
pub(crate) fn check_query(query: &[f32], established: Option<usize>) -> Result<()> {
    match established {
        Some(dims) if dims != query.len() => Err(Error::DimensionMismatch {
            expected: dims,
            actual: query.len(),
        }),
        _ => Ok(()),
    }
}

/// Build records for a validated write batch
pub(crate) fn build_records(
    document_id: Uuid,
    user_id: Uuid,
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    document_type: DocumentType,
) -> Vec<EmbeddingRecord> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            EmbeddingRecord::from_chunk(document_id, user_id, chunk, embedding.clone(), document_type)
        })
        .collect()
}
