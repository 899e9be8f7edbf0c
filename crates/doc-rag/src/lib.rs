//! doc-rag: retrieval pipeline for answering questions about a single document
//!
//! Extracted document text is chunked with page/slide tracking, embedded in
//! paced batches, and stored per document. At query time the retrieval engine
//! tries the store's vector index and falls back to an exact cosine scan,
//! then the context assembler builds a bounded, citation-aware context for an
//! external answer generator.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use generation::{AnswerGenerator, AnswerService, ContextAssembler, PromptBuilder};
pub use ingestion::{chunk_text, clean_text, TextChunker, TextExtractor};
pub use processing::{DocumentProcessor, DocumentRegistry, ProcessOutcome};
pub use providers::{shared_embedder, EmbeddingProvider, VectorStoreProvider};
pub use retrieval::{cosine_similarity, RetrievalEngine};
pub use types::{
    AssembledContext, Chunk, CitationLabel, Document, DocumentType, EmbeddingRecord, Retrieval,
    RetrievalResult, RetrievalTier,
};
