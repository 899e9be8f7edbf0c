//! Two-tier retrieval: vector index first, exact cosine scan as fallback

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, VectorStoreProvider};
use crate::types::{
    page_allowed, rank_results, PageFilter, Retrieval, RetrievalResult, RetrievalTier,
};

use super::keyword::{fuse_rankings, keyword_search};
use super::pages::{is_page_content_query, page_filter_for};
use super::similarity::rank_by_similarity;

/// One way of turning a query vector into ranked results
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    /// Tier reported when this strategy serves a request
    fn tier(&self) -> RetrievalTier;

    /// Up to `top_k` results for one document, best first
    async fn search(
        &self,
        store: &dyn VectorStoreProvider,
        query_embedding: &[f32],
        document_id: Uuid,
        top_k: usize,
        pages: Option<&PageFilter>,
    ) -> Result<Vec<RetrievalResult>>;
}

/// Server-side search through the store's vector index
pub struct IndexSearch {
    config: RetrievalConfig,
}

impl IndexSearch {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SearchStrategy for IndexSearch {
    fn tier(&self) -> RetrievalTier {
        RetrievalTier::VectorIndex
    }

    async fn search(
        &self,
        store: &dyn VectorStoreProvider,
        query_embedding: &[f32],
        document_id: Uuid,
        top_k: usize,
        pages: Option<&PageFilter>,
    ) -> Result<Vec<RetrievalResult>> {
        // Over-fetch from approximate indexes to make up for recall loss
        let candidates = if store.supports_approximate_search() {
            self.config.candidates_for(top_k)
        } else {
            top_k
        };

        let mut results = store
            .search(query_embedding, document_id, candidates, pages)
            .await?;
        rank_results(&mut results, top_k);
        Ok(results)
    }
}

/// Exact in-process cosine scan over every record of the document
pub struct ExactScan;

#[async_trait]
impl SearchStrategy for ExactScan {
    fn tier(&self) -> RetrievalTier {
        RetrievalTier::ExactScan
    }

    async fn search(
        &self,
        store: &dyn VectorStoreProvider,
        query_embedding: &[f32],
        document_id: Uuid,
        top_k: usize,
        pages: Option<&PageFilter>,
    ) -> Result<Vec<RetrievalResult>> {
        let records = store.records(document_id).await?;
        tracing::debug!(
            "Exact scan over {} records for document {}",
            records.len(),
            document_id
        );
        rank_by_similarity(
            query_embedding,
            records.iter().filter(|r| page_allowed(pages, r.page_number)),
            top_k,
        )
    }
}

/// Retrieval engine over one embedding provider and one vector store
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
    config: RetrievalConfig,
    primary: Box<dyn SearchStrategy>,
    fallback: Box<dyn SearchStrategy>,
}

impl RetrievalEngine {
    /// Create an engine with index search backed by the exact scan
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            primary: Box::new(IndexSearch::new(config.clone())),
            fallback: Box::new(ExactScan),
            config,
        }
    }

    /// Configured default result count
    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    /// Configured candidate count for `retrieve_relevant`
    pub fn candidate_pool(&self) -> usize {
        self.config.candidate_pool
    }

    /// Underlying vector store
    pub fn store(&self) -> &Arc<dyn VectorStoreProvider> {
        &self.store
    }

    /// Embed the query once and retrieve the `top_k` most relevant chunks.
    ///
    /// A document without embeddings yields an empty `Retrieval`, not an
    /// error.
    pub async fn retrieve(&self, query: &str, document_id: Uuid, top_k: usize) -> Result<Retrieval> {
        self.retrieve_in_pages(query, document_id, top_k, None).await
    }

    /// `retrieve` restricted to the pages of `pages`, on both tiers
    pub async fn retrieve_in_pages(
        &self,
        query: &str,
        document_id: Uuid,
        top_k: usize,
        pages: Option<&PageFilter>,
    ) -> Result<Retrieval> {
        if top_k == 0 {
            return Err(Error::invalid_configuration("top_k must be greater than 0"));
        }
        let query_embedding = self.embedder.embed(query).await?;
        self.search_tiers(&query_embedding, document_id, top_k, pages)
            .await
    }

    /// Retrieve with a precomputed query vector
    pub async fn retrieve_with_embedding(
        &self,
        query_embedding: &[f32],
        document_id: Uuid,
        top_k: usize,
    ) -> Result<Retrieval> {
        self.search_tiers(query_embedding, document_id, top_k, None)
            .await
    }

    /// Question-level retrieval used to answer a user.
    ///
    /// Pages named in the question (plus `page_window` neighbours) restrict
    /// both tiers. A question asking for a page's content ("explain page 4")
    /// returns every chunk of those pages in page then chunk order, unscored.
    /// Otherwise `candidates` vector results are merged with keyword matches
    /// by reciprocal rank fusion and filtered by the per-chunk-type
    /// similarity floors, which are lower when the question names pages.
    pub async fn retrieve_relevant(
        &self,
        question: &str,
        document_id: Uuid,
        candidates: usize,
    ) -> Result<Retrieval> {
        if candidates == 0 {
            return Err(Error::invalid_configuration("candidates must be greater than 0"));
        }

        let pages = page_filter_for(question, self.config.page_window);
        if let Some(filter) = &pages {
            tracing::debug!("Question names pages {:?}", filter.pages());
            if is_page_content_query(question) {
                return self.page_content(document_id, filter).await;
            }
        }

        let query_embedding = self.embedder.embed(question).await?;
        let vector = self
            .search_tiers(&query_embedding, document_id, candidates, pages.as_ref())
            .await?;

        let mut results = if self.config.hybrid {
            self.merge_keyword_matches(question, document_id, candidates, pages.as_ref(), vector.results)
                .await
        } else {
            vector.results
        };

        let thresholds = if pages.is_some() {
            &self.config.page_thresholds
        } else {
            &self.config.thresholds
        };
        let before = results.len();
        results.retain(|r| r.similarity >= thresholds.for_type(r.chunk_type));
        tracing::debug!(
            "Kept {}/{} chunks above the similarity floors",
            results.len(),
            before
        );

        Ok(Retrieval {
            results,
            served_by: vector.served_by,
        })
    }

    async fn search_tiers(
        &self,
        query_embedding: &[f32],
        document_id: Uuid,
        top_k: usize,
        pages: Option<&PageFilter>,
    ) -> Result<Retrieval> {
        let store = self.store.as_ref();

        match self
            .primary
            .search(store, query_embedding, document_id, top_k, pages)
            .await
        {
            Ok(results) if !results.is_empty() => {
                return Ok(self.finish(results, self.primary.tier(), document_id));
            }
            Ok(_) => {
                tracing::debug!(
                    "{} returned no results for document {}, using exact scan",
                    store.name(),
                    document_id
                );
            }
            Err(e) if e.is_recoverable_by_fallback() => {
                tracing::warn!(
                    "Vector search on {} failed for document {}, using exact scan: {}",
                    store.name(),
                    document_id,
                    e
                );
            }
            Err(e) => return Err(e),
        }

        let results = self
            .fallback
            .search(store, query_embedding, document_id, top_k, pages)
            .await?;
        Ok(self.finish(results, self.fallback.tier(), document_id))
    }

    /// Fuse keyword matches into the vector ranking; keyword failures leave
    /// the vector ranking as it is
    async fn merge_keyword_matches(
        &self,
        question: &str,
        document_id: Uuid,
        candidates: usize,
        pages: Option<&PageFilter>,
        vector: Vec<RetrievalResult>,
    ) -> Vec<RetrievalResult> {
        let mut records = match self.store.records(document_id).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Keyword search unavailable for document {}: {}", document_id, e);
                return vector;
            }
        };
        records.retain(|r| page_allowed(pages, r.page_number));

        let keyword = keyword_search(question, &records, candidates);
        if keyword.is_empty() {
            return vector;
        }
        tracing::debug!(
            "Fusing {} vector and {} keyword results",
            vector.len(),
            keyword.len()
        );
        fuse_rankings(vector, keyword, self.config.rrf_k, candidates)
    }

    async fn page_content(&self, document_id: Uuid, pages: &PageFilter) -> Result<Retrieval> {
        let mut records = self.store.records(document_id).await?;
        records.retain(|r| pages.allows(r.page_number));
        records.sort_by_key(|r| (r.page_number, r.chunk_index));

        tracing::info!(
            "Returning all {} chunks of pages {:?} for document {}",
            records.len(),
            pages.pages(),
            document_id
        );
        Ok(Retrieval {
            results: records
                .iter()
                .map(|r| RetrievalResult::from_record(r, 1.0))
                .collect(),
            served_by: RetrievalTier::PageContent,
        })
    }

    fn finish(
        &self,
        mut results: Vec<RetrievalResult>,
        served_by: RetrievalTier,
        document_id: Uuid,
    ) -> Retrieval {
        if let Some(threshold) = self.config.min_similarity {
            results.retain(|r| r.similarity >= threshold);
        }

        tracing::info!(
            "Retrieved {} chunks for document {} via {}",
            results.len(),
            document_id,
            served_by.as_str()
        );
        Retrieval { results, served_by }
    }
}
