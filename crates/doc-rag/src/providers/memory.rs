//! In-memory vector store with exact server-side search

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::retrieval::similarity::rank_by_similarity;
use crate::types::{page_allowed, Chunk, DocumentType, EmbeddingRecord, PageFilter, RetrievalResult};

use super::vector_store::{build_records, check_query, check_write, VectorStoreProvider};

/// Records held in memory, keyed by document
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<Uuid, Vec<EmbeddingRecord>>>,
    dimensions: RwLock<Option<usize>>,
    /// Whether `search` is served; without it every read falls back
    indexed: bool,
}

impl InMemoryVectorStore {
    /// Create a store with search enabled
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dimensions: RwLock::new(None),
            indexed: true,
        }
    }

    /// Create a store whose search index is missing
    pub fn without_index() -> Self {
        Self {
            indexed: false,
            ..Self::new()
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStoreProvider for InMemoryVectorStore {
    async fn write(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        document_type: DocumentType,
    ) -> Result<usize> {
        let mut dimensions = self.dimensions.write();
        let established = check_write(chunks, embeddings, *dimensions)?;

        let new_records = build_records(document_id, user_id, chunks, embeddings, document_type);
        let written = new_records.len();
        self.records
            .write()
            .entry(document_id)
            .or_default()
            .extend(new_records);
        *dimensions = established;

        Ok(written)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        document_id: Uuid,
        top_k: usize,
        pages: Option<&PageFilter>,
    ) -> Result<Vec<RetrievalResult>> {
        if !self.indexed {
            return Err(Error::search_unavailable("no vector index configured"));
        }
        check_query(query_embedding, *self.dimensions.read())?;

        let records = self.records.read();
        match records.get(&document_id) {
            Some(records) => rank_by_similarity(
                query_embedding,
                records.iter().filter(|r| page_allowed(pages, r.page_number)),
                top_k,
            ),
            None => Ok(Vec::new()),
        }
    }

    async fn records(&self, document_id: Uuid) -> Result<Vec<EmbeddingRecord>> {
        let mut records = self
            .records
            .read()
            .get(&document_id)
            .cloned()
            .unwrap_or_default();
        records.sort_by_key(|r| r.chunk_index);
        Ok(records)
    }

    async fn delete_all(&self, document_id: Uuid) -> Result<usize> {
        Ok(self
            .records
            .write()
            .remove(&document_id)
            .map(|records| records.len())
            .unwrap_or(0))
    }

    async fn dimensions(&self) -> Result<Option<usize>> {
        Ok(*self.dimensions.read())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().values().map(Vec::len).sum())
    }

    fn supports_approximate_search(&self) -> bool {
        false
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        if self.indexed {
            "memory"
        } else {
            "memory-unindexed"
        }
    }
}
