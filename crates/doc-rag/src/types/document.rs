//! Document, chunk, and embedding record types with source tracking for citations

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata key holding the source document type of a record
pub const META_DOCUMENT_TYPE: &str = "documentType";
/// Metadata key holding the chunk text length
pub const META_LENGTH: &str = "length";
/// Metadata key holding the chunk type
pub const META_CHUNK_TYPE: &str = "chunkType";

/// Supported upload formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// PDF document
    Pdf,
    /// Microsoft Word document (.docx)
    Docx,
    /// Microsoft PowerPoint presentation (.pptx)
    Pptx,
    /// Image (text comes from OCR)
    Image,
}

impl DocumentType {
    /// Every supported type
    pub const ALL: [DocumentType; 4] = [Self::Pdf, Self::Docx, Self::Pptx, Self::Image];

    /// Detect document type from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tiff" | "tif" => Some(Self::Image),
            _ => None,
        }
    }

    /// Detect document type from a filename
    pub fn from_filename(filename: &str) -> Option<Self> {
        std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Lowercase tag stored in record metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Image => "image",
        }
    }

    /// Unit name used when citing locations in this document
    pub fn citation_label(&self) -> CitationLabel {
        match self {
            Self::Pptx => CitationLabel::Slide,
            _ => CitationLabel::Page,
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit name for citations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CitationLabel {
    #[default]
    Page,
    Slide,
}

impl CitationLabel {
    /// Label as shown in citations ("Page" / "Slide")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "Page",
            Self::Slide => "Slide",
        }
    }

    /// Derive the label from a stored `documentType` metadata value
    pub fn from_metadata_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("pptx") {
            Self::Slide
        } else {
            Self::Page
        }
    }
}

impl std::fmt::Display for CitationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of background embedding generation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// An uploaded document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Original filename as uploaded
    pub filename: String,
    /// Document format
    pub document_type: DocumentType,
    /// Page or slide count reported by the extractor
    pub page_count: Option<u32>,
    /// Detected language
    pub language: String,
    /// Extracted text
    pub extracted_text: String,
    /// Hash of the extracted text
    pub content_hash: String,
    /// Embedding generation state
    pub embedding_status: EmbeddingStatus,
    /// Why embedding generation failed, if it did
    pub processing_error: Option<String>,
    /// Chunks written by the last successful run
    pub total_chunks: u32,
    /// Upload timestamp
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

impl Document {
    /// Create a new document from extracted text
    pub fn new(
        user_id: Uuid,
        filename: impl Into<String>,
        document_type: DocumentType,
        extracted_text: impl Into<String>,
        page_count: Option<u32>,
    ) -> Self {
        let extracted_text = extracted_text.into();
        Self {
            id: Uuid::new_v4(),
            user_id,
            filename: filename.into(),
            document_type,
            page_count,
            language: "en".to_string(),
            content_hash: content_hash(&extracted_text),
            extracted_text,
            embedding_status: EmbeddingStatus::Pending,
            processing_error: None,
            total_chunks: 0,
            uploaded_at: chrono::Utc::now(),
        }
    }

    /// Set the detected language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Citation label derived from the document's own type
    pub fn citation_label(&self) -> CitationLabel {
        self.document_type.citation_label()
    }
}

/// SHA-256 hex digest of document text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Kind of content a chunk carries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    #[default]
    Text,
    Table,
    Image,
}

impl ChunkType {
    /// Classify chunk text by the extractor's content markers
    pub fn detect(text: &str) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with("[IMAGE DESCRIPTION") {
            Self::Image
        } else if trimmed.starts_with("[TABLE - Page") || trimmed.starts_with("| ") {
            Self::Table
        } else {
            Self::Text
        }
    }

    /// Lowercase tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Image => "image",
        }
    }

    /// Parse a stored tag, defaulting to text
    pub fn parse(tag: &str) -> Self {
        match tag {
            "table" => Self::Table,
            "image" => Self::Image,
            _ => Self::Text,
        }
    }
}

/// A chunk of document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text content (a verbatim slice of the cleaned text)
    pub text: String,
    /// Zero-based position among the document's chunks
    pub chunk_index: u32,
    /// Page or slide number; approximate unless a marker was found
    pub page_number: u32,
    /// Whether `page_number` came from an explicit marker
    pub page_from_marker: bool,
    /// Byte offset of the chunk start in the cleaned text
    pub char_start: usize,
    /// Byte offset one past the chunk end in the cleaned text
    pub char_end: usize,
    /// Content kind
    pub chunk_type: ChunkType,
}

/// A persisted chunk with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Owning document
    pub document_id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Position among the document's chunks
    pub chunk_index: u32,
    /// Chunk text
    pub chunk_text: String,
    /// Page or slide number
    pub page_number: Option<u32>,
    /// Content kind
    pub chunk_type: ChunkType,
    /// Embedding vector
    pub embedding: Vec<f32>,
    /// Open metadata (at least `documentType`)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EmbeddingRecord {
    /// Build a record from a chunk and its vector
    pub fn from_chunk(
        document_id: Uuid,
        user_id: Uuid,
        chunk: &Chunk,
        embedding: Vec<f32>,
        document_type: DocumentType,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            META_DOCUMENT_TYPE.to_string(),
            serde_json::json!(document_type.as_str()),
        );
        metadata.insert(
            META_LENGTH.to_string(),
            serde_json::json!(chunk.text.chars().count().to_string()),
        );
        metadata.insert(
            META_CHUNK_TYPE.to_string(),
            serde_json::json!(chunk.chunk_type.as_str()),
        );

        Self {
            document_id,
            user_id,
            chunk_index: chunk.chunk_index,
            chunk_text: chunk.text.clone(),
            page_number: Some(chunk.page_number),
            chunk_type: chunk.chunk_type,
            embedding,
            metadata,
        }
    }

    /// Stored document type tag, if present
    pub fn document_type_tag(&self) -> Option<&str> {
        self.metadata.get(META_DOCUMENT_TYPE).and_then(|v| v.as_str())
    }
}
