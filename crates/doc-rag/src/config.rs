//! Configuration for the retrieval pipeline
//!
//! Values are resolved in order: built-in defaults, an optional TOML file,
//! then `DOC_RAG_<SECTION>_<FIELD>` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{ChunkType, DocumentType};

/// Prefix for environment overrides
const ENV_PREFIX: &str = "DOC_RAG_";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Embedding provider configuration
    pub embeddings: EmbeddingConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Retrieval configuration
    pub retrieval: RetrievalConfig,
    /// Context assembly configuration
    pub context: ContextConfig,
    /// Vector store configuration
    pub vector_db: VectorDbConfig,
    /// Background processing configuration
    pub processing: ProcessingConfig,
}

impl RagConfig {
    /// Load configuration: defaults, then the file (if any), then env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Overlay `DOC_RAG_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        let vars: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        self.apply_vars(vars)
    }

    fn apply_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let key = key.strip_prefix(ENV_PREFIX).unwrap_or(&key).to_lowercase();
            let Some((section, field)) = key.split_once('_') else {
                tracing::warn!("Ignoring malformed config variable {}{}", ENV_PREFIX, key);
                continue;
            };
            let applied = match section {
                "embeddings" => self.embeddings.apply(field, &value),
                "retrieval" => self.retrieval.apply(field, &value),
                "context" => self.context.apply(field, &value),
                "vector" => self.vector_db.apply(field, &value),
                "processing" => self.processing.apply(field, &value),
                _ => Ok(false),
            }?;
            if !applied {
                tracing::warn!("Unknown config variable {}{}", ENV_PREFIX, key.to_uppercase());
            }
        }
        Ok(())
    }

    /// Reject values that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.embeddings.batch_size == 0 {
            return Err(Error::invalid_configuration("embeddings.batch_size must be > 0"));
        }
        if self.embeddings.max_input_chars == 0 {
            return Err(Error::invalid_configuration("embeddings.max_input_chars must be > 0"));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::invalid_configuration("retrieval.top_k must be > 0"));
        }
        if self.retrieval.overfetch_factor == 0 {
            return Err(Error::invalid_configuration("retrieval.overfetch_factor must be > 0"));
        }
        if self.retrieval.candidate_pool == 0 {
            return Err(Error::invalid_configuration("retrieval.candidate_pool must be > 0"));
        }
        if !(self.retrieval.rrf_k.is_finite() && self.retrieval.rrf_k > 0.0) {
            return Err(Error::invalid_configuration("retrieval.rrf_k must be a positive number"));
        }
        self.retrieval.thresholds.validate("retrieval.thresholds")?;
        self.retrieval.page_thresholds.validate("retrieval.page_thresholds")?;
        if self.context.max_context_chars == 0 {
            return Err(Error::invalid_configuration("context.max_context_chars must be > 0"));
        }
        if self.context.max_text_chunks == 0 {
            return Err(Error::invalid_configuration("context.max_text_chunks must be > 0"));
        }
        for document_type in DocumentType::ALL {
            self.chunking.params_for(document_type).validate()?;
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", field, value)))
}

/// Which embedding backend to talk to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/embeddings` endpoint
    #[default]
    OpenAi,
    /// Local Ollama server
    Ollama,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend provider
    pub backend: EmbeddingBackend,
    /// Provider base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Vector dimensionality produced by the model
    pub dimensions: usize,
    /// API key; falls back to `OPENAI_API_KEY` when unset
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Maximum texts per provider request
    pub batch_size: usize,
    /// Per-text character ceiling; longer inputs are cut (lossy)
    pub max_input_chars: usize,
    /// Pause between consecutive batches in milliseconds
    pub batch_delay_ms: u64,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for transient failures
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_key: None,
            batch_size: 100,
            max_input_chars: 8000,
            batch_delay_ms: 100,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the API key from config or `OPENAI_API_KEY`
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    fn apply(&mut self, field: &str, value: &str) -> Result<bool> {
        match field {
            "backend" => {
                self.backend = match value.to_lowercase().as_str() {
                    "openai" => EmbeddingBackend::OpenAi,
                    "ollama" => EmbeddingBackend::Ollama,
                    other => return Err(Error::Config(format!("Unknown embedding backend: {}", other))),
                }
            }
            "base_url" => self.base_url = value.to_string(),
            "model" => self.model = value.to_string(),
            "dimensions" => self.dimensions = parse(field, value)?,
            "api_key" => self.api_key = Some(value.to_string()),
            "batch_size" => self.batch_size = parse(field, value)?,
            "max_input_chars" => self.max_input_chars = parse(field, value)?,
            "batch_delay_ms" => self.batch_delay_ms = parse(field, value)?,
            "timeout_secs" => self.timeout_secs = parse(field, value)?,
            "max_retries" => self.max_retries = parse(field, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Chunk size and overlap, both in approximate tokens
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkParams {
    /// Target chunk size
    pub target_size: usize,
    /// Tokens shared between consecutive chunks
    pub overlap: usize,
}

impl ChunkParams {
    /// Create chunk parameters
    pub const fn new(target_size: usize, overlap: usize) -> Self {
        Self { target_size, overlap }
    }

    /// `0 < overlap < target_size` must hold
    pub fn validate(&self) -> Result<()> {
        if self.overlap == 0 {
            return Err(Error::invalid_configuration("chunk overlap must be greater than 0"));
        }
        if self.overlap >= self.target_size {
            return Err(Error::invalid_configuration(format!(
                "chunk overlap ({}) must be smaller than target size ({})",
                self.overlap, self.target_size
            )));
        }
        Ok(())
    }
}

/// Text chunking configuration, tuned per document type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Standard academic/business documents
    pub pdf: ChunkParams,
    /// Slides are short and concise
    pub pptx: ChunkParams,
    /// Word documents can run long
    pub docx: ChunkParams,
    /// Everything else (OCR'd images)
    pub default: ChunkParams,
    /// Documents with less extracted text than this are not embedded
    pub min_text_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            pdf: ChunkParams::new(800, 100),
            pptx: ChunkParams::new(500, 75),
            docx: ChunkParams::new(1000, 150),
            default: ChunkParams::new(800, 100),
            min_text_chars: 50,
        }
    }
}

impl ChunkingConfig {
    /// Parameters for a document type
    pub fn params_for(&self, document_type: DocumentType) -> ChunkParams {
        match document_type {
            DocumentType::Pdf => self.pdf,
            DocumentType::Pptx => self.pptx,
            DocumentType::Docx => self.docx,
            DocumentType::Image => self.default,
        }
    }
}

/// Minimum similarity a result needs to be kept, per chunk type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChunkTypeThresholds {
    pub text: f32,
    pub table: f32,
    pub image: f32,
}

impl ChunkTypeThresholds {
    pub const fn new(text: f32, table: f32, image: f32) -> Self {
        Self { text, table, image }
    }

    /// Threshold for one chunk type
    pub fn for_type(&self, chunk_type: ChunkType) -> f32 {
        match chunk_type {
            ChunkType::Text => self.text,
            ChunkType::Table => self.table,
            ChunkType::Image => self.image,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if [self.text, self.table, self.image].iter().all(|t| t.is_finite()) {
            Ok(())
        } else {
            Err(Error::invalid_configuration(format!("{} must be finite", name)))
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default number of results
    pub top_k: usize,
    /// Candidates requested per result from an approximate index
    pub overfetch_factor: usize,
    /// Lower bound on candidates requested from an approximate index
    pub min_candidates: usize,
    /// Drop results scoring below this after ranking
    pub min_similarity: Option<f32>,
    /// Candidates each strategy contributes to a relevance retrieval
    pub candidate_pool: usize,
    /// Neighbouring pages added around a page named in the question
    pub page_window: u32,
    /// Merge keyword matches into vector results
    pub hybrid: bool,
    /// Reciprocal rank fusion constant
    pub rrf_k: f32,
    /// Per-type floors for open questions
    pub thresholds: ChunkTypeThresholds,
    /// Per-type floors when the question names pages
    pub page_thresholds: ChunkTypeThresholds,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            overfetch_factor: 10,
            min_candidates: 50,
            min_similarity: None,
            candidate_pool: 15,
            page_window: 1,
            hybrid: true,
            rrf_k: 60.0,
            thresholds: ChunkTypeThresholds::new(0.20, 0.18, 0.18),
            page_thresholds: ChunkTypeThresholds::new(0.10, 0.08, 0.08),
        }
    }
}

impl RetrievalConfig {
    /// Candidate count for an approximate index: `max(top_k * factor, floor)`
    pub fn candidates_for(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.overfetch_factor)
            .max(self.min_candidates)
    }

    fn apply(&mut self, field: &str, value: &str) -> Result<bool> {
        match field {
            "top_k" => self.top_k = parse(field, value)?,
            "overfetch_factor" => self.overfetch_factor = parse(field, value)?,
            "min_candidates" => self.min_candidates = parse(field, value)?,
            "min_similarity" => self.min_similarity = Some(parse(field, value)?),
            "candidate_pool" => self.candidate_pool = parse(field, value)?,
            "page_window" => self.page_window = parse(field, value)?,
            "hybrid" => self.hybrid = parse(field, value)?,
            "rrf_k" => self.rrf_k = parse(field, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Raw document characters used when retrieval finds nothing
    pub raw_text_fallback_chars: usize,
    /// Upper bound on assembled context length
    pub max_context_chars: usize,
    /// Conversation turns carried into the prompt
    pub history_turns: usize,
    /// Most text chunks placed in one context
    pub max_text_chunks: usize,
    /// Most table chunks placed in one context
    pub max_table_chunks: usize,
    /// Most image description chunks placed in one context
    pub max_image_chunks: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            raw_text_fallback_chars: 2000,
            max_context_chars: 12_000,
            history_turns: 6,
            max_text_chunks: 4,
            max_table_chunks: 2,
            max_image_chunks: 2,
        }
    }
}

impl ContextConfig {
    fn apply(&mut self, field: &str, value: &str) -> Result<bool> {
        match field {
            "raw_text_fallback_chars" => self.raw_text_fallback_chars = parse(field, value)?,
            "max_context_chars" => self.max_context_chars = parse(field, value)?,
            "history_turns" => self.history_turns = parse(field, value)?,
            "max_text_chunks" => self.max_text_chunks = parse(field, value)?,
            "max_table_chunks" => self.max_table_chunks = parse(field, value)?,
            "max_image_chunks" => self.max_image_chunks = parse(field, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// SQLite database path
    pub storage_path: PathBuf,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        let storage_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("doc-rag")
            .join("embeddings.db");
        Self { storage_path }
    }
}

impl VectorDbConfig {
    fn apply(&mut self, field: &str, value: &str) -> Result<bool> {
        match field {
            "db_storage_path" | "storage_path" => self.storage_path = PathBuf::from(value),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Background processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Timeout for the embedding provider calls of one document, in seconds
    pub document_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            document_timeout_secs: 300,
        }
    }
}

impl ProcessingConfig {
    fn apply(&mut self, field: &str, value: &str) -> Result<bool> {
        match field {
            "document_timeout_secs" => self.document_timeout_secs = parse(field, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embeddings.batch_size, 100);
        assert_eq!(config.chunking.params_for(DocumentType::Pptx), ChunkParams::new(500, 75));
    }

    #[test]
    fn test_candidates_for() {
        let retrieval = RetrievalConfig::default();
        assert_eq!(retrieval.candidates_for(2), 50);
        assert_eq!(retrieval.candidates_for(8), 80);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RagConfig::from_toml(
            r#"
            [embeddings]
            backend = "ollama"
            model = "nomic-embed-text"
            dimensions = 768

            [chunking.pdf]
            target_size = 400
            overlap = 40
            "#,
        )
        .unwrap();

        assert_eq!(config.embeddings.backend, EmbeddingBackend::Ollama);
        assert_eq!(config.embeddings.dimensions, 768);
        assert_eq!(config.embeddings.batch_size, 100);
        assert_eq!(config.chunking.pdf, ChunkParams::new(400, 40));
        assert_eq!(config.chunking.docx, ChunkParams::new(1000, 150));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = RagConfig::default();
        config
            .apply_vars(vec![
                ("DOC_RAG_RETRIEVAL_TOP_K".to_string(), "8".to_string()),
                ("DOC_RAG_EMBEDDINGS_BATCH_DELAY_MS".to_string(), "0".to_string()),
                ("DOC_RAG_VECTOR_DB_STORAGE_PATH".to_string(), "/tmp/x.db".to_string()),
            ])
            .unwrap();

        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.embeddings.batch_delay_ms, 0);
        assert_eq!(config.vector_db.storage_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let mut config = RagConfig::default();
        let result = config.apply_vars(vec![(
            "DOC_RAG_RETRIEVAL_TOP_K".to_string(),
            "many".to_string(),
        )]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_context_and_overfetch() {
        let mut config = RagConfig::default();
        config.context.max_context_chars = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));

        let mut config = RagConfig::default();
        config.retrieval.overfetch_factor = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));

        let mut config = RagConfig::default();
        config.retrieval.page_thresholds.image = f32::NAN;
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_thresholds_from_toml() {
        let config = RagConfig::from_toml(
            r#"
            [retrieval]
            hybrid = false

            [retrieval.thresholds]
            text = 0.3
            table = 0.25
            image = 0.2
            "#,
        )
        .unwrap();

        assert!(!config.retrieval.hybrid);
        assert_eq!(config.retrieval.thresholds.for_type(ChunkType::Table), 0.25);
        assert_eq!(config.retrieval.page_thresholds.for_type(ChunkType::Text), 0.10);
        assert_eq!(config.context.max_table_chunks, 2);
    }

    #[test]
    fn test_validate_rejects_bad_overlap() {
        let mut config = RagConfig::default();
        config.chunking.docx = ChunkParams::new(100, 100);
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));
    }
}
