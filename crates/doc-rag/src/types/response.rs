//! Retrieval and context types handed to the answer generator

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::document::{ChunkType, CitationLabel, EmbeddingRecord, META_DOCUMENT_TYPE};

/// A ranked chunk returned by retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Chunk text
    pub chunk_text: String,
    /// Page or slide number, if known
    pub page_number: Option<u32>,
    /// Position among the document's chunks
    pub chunk_index: u32,
    /// Similarity score (higher is more relevant)
    pub similarity: f32,
    /// Content kind
    pub chunk_type: ChunkType,
    /// Record metadata (carries `documentType`)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetrievalResult {
    /// Build a result from a stored record and its score
    pub fn from_record(record: &EmbeddingRecord, similarity: f32) -> Self {
        Self {
            chunk_text: record.chunk_text.clone(),
            page_number: record.page_number,
            chunk_index: record.chunk_index,
            similarity,
            chunk_type: record.chunk_type,
            metadata: record.metadata.clone(),
        }
    }

    /// Citation label stored with the record, if any
    pub fn citation_label(&self) -> Option<CitationLabel> {
        self.metadata
            .get(META_DOCUMENT_TYPE)
            .and_then(|v| v.as_str())
            .map(CitationLabel::from_metadata_value)
    }

    /// Ranking order: similarity descending, then chunk index ascending
    pub fn rank_cmp(a: &Self, b: &Self) -> Ordering {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    }
}

/// Sort results into ranking order and keep the first `top_k`
pub fn rank_results(results: &mut Vec<RetrievalResult>, top_k: usize) {
    results.sort_by(RetrievalResult::rank_cmp);
    results.truncate(top_k);
}

/// Restricts retrieval to a set of pages or slides.
///
/// An empty filter restricts nothing. Records without a page number never
/// pass a non-empty filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFilter {
    pages: Vec<u32>,
}

impl PageFilter {
    pub fn new(pages: impl IntoIterator<Item = u32>) -> Self {
        let mut pages: Vec<u32> = pages.into_iter().collect();
        pages.sort_unstable();
        pages.dedup();
        Self { pages }
    }

    /// Pages in ascending order
    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether a record on `page` passes the filter
    pub fn allows(&self, page: Option<u32>) -> bool {
        if self.pages.is_empty() {
            return true;
        }
        page.is_some_and(|p| self.pages.binary_search(&p).is_ok())
    }
}

/// Whether `page` passes an optional filter
pub fn page_allowed(filter: Option<&PageFilter>, page: Option<u32>) -> bool {
    filter.map_or(true, |f| f.allows(page))
}

/// Which search tier produced a retrieval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalTier {
    /// Server-side vector index
    VectorIndex,
    /// Exact in-process cosine scan
    ExactScan,
    /// Every chunk of the requested pages, without scoring
    PageContent,
}

impl RetrievalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VectorIndex => "vector_index",
            Self::ExactScan => "exact_scan",
            Self::PageContent => "page_content",
        }
    }
}

/// Outcome of a retrieval call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retrieval {
    /// Ranked results; empty when the document has no embeddings
    pub results: Vec<RetrievalResult>,
    /// Tier that served the request
    pub served_by: RetrievalTier,
}

impl Retrieval {
    /// True when no embeddings matched (handled by raw-text context)
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Context prepared for the answer generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    /// Labeled chunk texts, or the raw-text fallback
    pub context: String,
    /// Distinct page numbers in rank order
    pub page_references: Vec<u32>,
    /// "Page" or "Slide"
    pub citation_label: CitationLabel,
    /// Retrieved chunks that made it into the context
    pub chunks_used: usize,
    /// Whether the context came from raw document text
    pub from_raw_text: bool,
}

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A prior message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A generated answer with its provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Generator output
    pub text: String,
    /// Pages or slides the context was drawn from
    pub page_references: Vec<u32>,
    /// "Page" or "Slide"
    pub citation_label: CitationLabel,
    /// Tier that served retrieval; `None` when retrieval failed
    pub served_by: Option<RetrievalTier>,
    /// Number of chunks in the context
    pub chunks_used: usize,
}
