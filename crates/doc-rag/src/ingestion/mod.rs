//! Text cleanup, extraction seam, and chunking

pub mod chunker;
mod extractor;

pub use chunker::{chunk_text, clean_text, estimate_tokens, TextChunker};
pub use extractor::{ExtractedText, PlainTextExtractor, TextExtractor};
