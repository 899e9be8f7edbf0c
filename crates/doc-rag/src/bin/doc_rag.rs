//! doc-rag command line
//!
//! Run with: cargo run -p doc-rag -- index report.pdf.txt --type pdf

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use doc_rag::config::RagConfig;
use doc_rag::generation::ContextAssembler;
use doc_rag::ingestion::{PlainTextExtractor, TextExtractor};
use doc_rag::processing::{DocumentProcessor, DocumentRegistry};
use doc_rag::providers::{shared_embedder, SqliteVectorStore, VectorStoreProvider};
use doc_rag::retrieval::RetrievalEngine;
use doc_rag::types::{Document, DocumentType};

#[derive(Parser)]
#[command(name = "doc-rag", version, about = "Single-document retrieval pipeline")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and store extracted document text
    Index {
        /// UTF-8 text produced by a format extractor
        file: PathBuf,
        /// Source format (pdf, docx, pptx, image); guessed from the filename if omitted
        #[arg(long = "type")]
        document_type: Option<String>,
        /// Reuse an existing document id
        #[arg(long)]
        document_id: Option<Uuid>,
        #[arg(long)]
        user_id: Option<Uuid>,
    },
    /// Retrieve ranked chunks and print the assembled context
    Query {
        document_id: Uuid,
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Vector tiers only: no page detection, keyword fusion or thresholds
        #[arg(long)]
        plain: bool,
        /// Extracted text, used when nothing is retrieved
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long = "type", default_value = "pdf")]
        document_type: String,
    },
    /// Remove every stored embedding for a document
    Delete { document_id: Uuid },
}

fn parse_type(value: Option<&str>, file: &std::path::Path) -> anyhow::Result<DocumentType> {
    if let Some(value) = value {
        return DocumentType::from_extension(value)
            .with_context(|| format!("unsupported document type: {}", value));
    }
    // report.pdf.txt -> pdf
    let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    DocumentType::from_filename(stem)
        .or_else(|| file.to_str().and_then(DocumentType::from_filename))
        .with_context(|| format!("cannot infer document type of {}; pass --type", file.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = RagConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Embedding model: {}", config.embeddings.model);
    tracing::info!("  - Embedding dimensions: {}", config.embeddings.dimensions);
    tracing::info!("  - Store: {}", config.vector_db.storage_path.display());

    let store: Arc<dyn VectorStoreProvider> =
        Arc::new(SqliteVectorStore::new(&config.vector_db.storage_path)?);

    match cli.command {
        Command::Index {
            file,
            document_type,
            document_id,
            user_id,
        } => {
            let document_type = parse_type(document_type.as_deref(), &file)?;
            let bytes = std::fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let extracted = PlainTextExtractor.extract(document_type, &bytes)?;

            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut document = Document::new(
                user_id.unwrap_or_else(Uuid::new_v4),
                filename,
                document_type,
                extracted.text,
                extracted.page_count,
            );
            if let Some(id) = document_id {
                document.id = id;
            }

            let registry = DocumentRegistry::new();
            registry.insert(document.clone());
            let processor = DocumentProcessor::new(
                shared_embedder(&config.embeddings)?,
                store,
                registry.clone(),
                &config,
            );

            let outcome = processor
                .on_document_text_ready(
                    document.id,
                    document.user_id,
                    document.extracted_text.clone(),
                    document_type,
                )
                .await??;

            let status = registry.get(&document.id).context("document vanished from registry")?;
            println!("document_id: {}", document.id);
            println!("outcome:     {:?}", outcome);
            println!("status:      {:?}", status.embedding_status);
            if let Some(error) = status.processing_error {
                println!("error:       {}", error);
            }
        }

        Command::Query {
            document_id,
            question,
            top_k,
            plain,
            source,
            document_type,
        } => {
            let document_type = DocumentType::from_extension(&document_type)
                .with_context(|| format!("unsupported document type: {}", document_type))?;
            let raw_text = match &source {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => String::new(),
            };
            let mut document = Document::new(Uuid::nil(), "query", document_type, raw_text, None);
            document.id = document_id;

            let engine = RetrievalEngine::new(
                shared_embedder(&config.embeddings)?,
                store,
                config.retrieval.clone(),
            );
            let retrieval = if plain {
                let top_k = top_k.unwrap_or(engine.default_top_k());
                engine.retrieve(&question, document_id, top_k).await?
            } else {
                let candidates = top_k.unwrap_or(engine.candidate_pool());
                engine.retrieve_relevant(&question, document_id, candidates).await?
            };

            println!("served by: {}", retrieval.served_by.as_str());
            for (rank, result) in retrieval.results.iter().enumerate() {
                println!(
                    "{:>2}. chunk {:<4} page {:<5} similarity {:.4}",
                    rank + 1,
                    result.chunk_index,
                    result
                        .page_number
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    result.similarity
                );
            }

            let context = ContextAssembler::new(&config.context).assemble(&retrieval.results, &document);
            println!(
                "\n{} references: {:?}{}",
                context.citation_label,
                context.page_references,
                if context.from_raw_text { " (raw text fallback)" } else { "" }
            );
            println!("\n{}", context.context);
        }

        Command::Delete { document_id } => {
            let removed = store.delete_all(document_id).await?;
            println!("Removed {} embeddings for {}", removed, document_id);
        }
    }

    Ok(())
}
