//! Core types for the pipeline

pub mod document;
pub mod response;

pub use document::{
    content_hash, Chunk, ChunkType, CitationLabel, Document, DocumentType, EmbeddingRecord,
    EmbeddingStatus, META_CHUNK_TYPE, META_DOCUMENT_TYPE, META_LENGTH,
};
pub use response::{
    page_allowed, rank_results, Answer, AssembledContext, ConversationTurn, PageFilter, Retrieval,
    RetrievalResult, RetrievalTier, Role,
};
