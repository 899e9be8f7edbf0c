//! Background embedding generation for uploaded documents

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::{ChunkingConfig, RagConfig};
use crate::error::{Error, Result};
use crate::ingestion::{clean_text, TextChunker};
use crate::providers::{EmbeddingProvider, VectorStoreProvider};
use crate::types::{content_hash, DocumentType, EmbeddingStatus};

use super::registry::DocumentRegistry;

/// Failure message recorded for documents without usable text
pub const NO_TEXT_EXTRACTED: &str = "no text extracted";

/// How a processing run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Old records replaced by this many new ones
    Embedded { chunks: usize },
    /// Text matches the last completed run, whose records are kept
    Unchanged { chunks: usize },
    /// Too little text to embed; provider never called
    NoText,
    /// Document was deleted before the run started
    Cancelled,
}

/// Last completed run of a document
#[derive(Debug, Clone)]
struct CompletedRun {
    hash: String,
    chunks: usize,
}

/// Runs chunk -> embed -> replace for documents, off the request path
#[derive(Clone)]
pub struct DocumentProcessor {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
    registry: DocumentRegistry,
    chunking: ChunkingConfig,
    embed_timeout: Duration,
    /// Serializes write/delete phases per document
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    completed: Arc<DashMap<Uuid, CompletedRun>>,
    /// Runs and deletes started but not finished, per document
    in_flight: Arc<DashMap<Uuid, usize>>,
    /// Documents deleted while work for them was in flight
    deleted: Arc<DashSet<Uuid>>,
}

impl DocumentProcessor {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
        registry: DocumentRegistry,
        config: &RagConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            registry,
            chunking: config.chunking.clone(),
            embed_timeout: Duration::from_secs(config.processing.document_timeout_secs),
            locks: Arc::new(DashMap::new()),
            completed: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            deleted: Arc::new(DashSet::new()),
        }
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    fn lock_for(&self, document_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn begin(&self, document_id: Uuid) {
        *self.in_flight.entry(document_id).or_insert(0) += 1;
    }

    /// Mark one run or delete finished. The last one out clears the
    /// tombstone and the document's lock.
    fn end(&self, document_id: Uuid) {
        if let Entry::Occupied(mut entry) = self.in_flight.entry(document_id) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
                if self.deleted.remove(&document_id).is_some() {
                    self.locks.remove(&document_id);
                    tracing::debug!("Cleared delete tombstone for document {}", document_id);
                }
            }
        }
    }

    /// Start embedding generation for a document as a detached task.
    ///
    /// Returns immediately. The outcome is recorded on the registry entry
    /// (when the document is registered) and logged; the handle may be
    /// awaited or dropped. Only the provider calls are bounded by the
    /// timeout: once embeddings exist, replacing the stored records always
    /// runs to completion while the document lock is held.
    pub fn on_document_text_ready(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        text: String,
        document_type: DocumentType,
    ) -> JoinHandle<Result<ProcessOutcome>> {
        let processor = self.clone();
        self.begin(document_id);

        tokio::spawn(async move {
            let result = {
                let lock = processor.lock_for(document_id);
                let _guard = lock.lock().await;

                if processor.deleted.contains(&document_id) {
                    tracing::info!("Document {} was deleted, skipping embeddings", document_id);
                    Ok(ProcessOutcome::Cancelled)
                } else {
                    processor
                        .process(document_id, user_id, &text, document_type)
                        .await
                }
            };

            processor.record(document_id, &result);
            processor.end(document_id);
            result
        })
    }

    async fn process(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        text: &str,
        document_type: DocumentType,
    ) -> Result<ProcessOutcome> {
        let hash = content_hash(text);
        if let Some(run) = self.completed.get(&document_id).filter(|run| run.hash == hash) {
            tracing::info!("Document {} unchanged, keeping existing embeddings", document_id);
            return Ok(ProcessOutcome::Unchanged { chunks: run.chunks });
        }

        let cleaned = clean_text(text);
        if cleaned.chars().count() < self.chunking.min_text_chars {
            tracing::warn!(
                "Document {} has {} chars of text, skipping embeddings",
                document_id,
                cleaned.chars().count()
            );
            return Ok(ProcessOutcome::NoText);
        }

        let chunker = TextChunker::new(self.chunking.params_for(document_type))?;
        let chunks = chunker.chunk(&cleaned);
        if chunks.is_empty() {
            return Ok(ProcessOutcome::NoText);
        }

        tracing::info!(
            "Embedding {} chunks for document {} ({})",
            chunks.len(),
            document_id,
            document_type
        );
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = match timeout(self.embed_timeout, self.embedder.embed_batch(&texts)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::internal(format!(
                    "embedding generation timed out after {:?}",
                    self.embed_timeout
                )))
            }
        };

        let removed = self.store.delete_all(document_id).await?;
        if removed > 0 {
            tracing::debug!("Removed {} stale records for document {}", removed, document_id);
        }
        let written = self
            .store
            .write(document_id, user_id, &chunks, &embeddings, document_type)
            .await?;

        self.completed.insert(
            document_id,
            CompletedRun {
                hash,
                chunks: written,
            },
        );
        Ok(ProcessOutcome::Embedded { chunks: written })
    }

    /// Reflect a run's result on the registry and in the logs
    fn record(&self, document_id: Uuid, result: &Result<ProcessOutcome>) {
        let tracked = self.registry.contains(&document_id);
        let update = match result {
            Ok(ProcessOutcome::Embedded { chunks }) => {
                tracing::info!("Generated {} embeddings for document {}", chunks, document_id);
                tracked.then(|| self.registry.mark_completed(&document_id, *chunks as u32))
            }
            Ok(ProcessOutcome::Unchanged { chunks }) => {
                // a re-registered entry starts out pending again
                let pending = self
                    .registry
                    .get(&document_id)
                    .is_some_and(|doc| doc.embedding_status == EmbeddingStatus::Pending);
                pending.then(|| self.registry.mark_completed(&document_id, *chunks as u32))
            }
            Ok(ProcessOutcome::Cancelled) => None,
            Ok(ProcessOutcome::NoText) => {
                tracked.then(|| self.registry.mark_failed(&document_id, NO_TEXT_EXTRACTED))
            }
            Err(e) => {
                tracing::error!("Embedding generation failed for document {}: {}", document_id, e);
                tracked.then(|| self.registry.mark_failed(&document_id, e.to_string()))
            }
        };

        if let Some(Err(e)) = update {
            tracing::warn!("Could not update status for document {}: {}", document_id, e);
        }
    }

    /// Remove every record for a document and forget it.
    ///
    /// Waits for any in-flight run on the same document. Runs that reach the
    /// document lock after this call are cancelled; once every run and
    /// delete in flight for the document has finished, the document can be
    /// processed again.
    pub async fn on_document_deleted(&self, document_id: Uuid) -> Result<usize> {
        self.begin(document_id);
        self.deleted.insert(document_id);
        let lock = self.lock_for(document_id);

        let removed = {
            let _guard = lock.lock().await;
            let removed = self.store.delete_all(document_id).await;
            if removed.is_ok() {
                self.completed.remove(&document_id);
                self.registry.remove(&document_id);
            }
            removed
        };
        self.end(document_id);

        let removed = removed?;
        tracing::info!("Deleted document {} ({} embeddings)", document_id, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkParams;
    use crate::providers::InMemoryVectorStore;
    use crate::types::{Chunk, Document, EmbeddingRecord, PageFilter, RetrievalResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; fails or stalls on demand
    #[derive(Default)]
    struct CountingEmbedder {
        batches: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(Error::embedding("quota exceeded"));
            }
            Ok(texts
                .iter()
                .map(|t| vec![1.0, t.len() as f32, 0.5])
                .collect())
        }

        fn dimensions(&self) -> usize {
            3
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn config() -> RagConfig {
        let mut config = RagConfig::default();
        config.chunking.pdf = ChunkParams::new(8, 2);
        config
    }

    fn long_text() -> String {
        (1..=40)
            .map(|i| format!("sentence{} ", i))
            .collect::<String>()
    }

    fn setup(fail: bool) -> (DocumentProcessor, Arc<CountingEmbedder>, Arc<InMemoryVectorStore>, Document) {
        let embedder = Arc::new(CountingEmbedder {
            fail,
            ..Default::default()
        });
        let store = Arc::new(InMemoryVectorStore::new());
        let registry = DocumentRegistry::new();
        let doc = Document::new(Uuid::new_v4(), "paper.pdf", DocumentType::Pdf, long_text(), Some(4));
        registry.insert(doc.clone());

        let processor = DocumentProcessor::new(embedder.clone(), store.clone(), registry, &config());
        (processor, embedder, store, doc)
    }

    #[tokio::test]
    async fn test_embeds_and_marks_completed() {
        let (processor, _embedder, store, doc) = setup(false);

        let outcome = processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();

        // 40 tokens, target 8, overlap 2 -> windows at 0, 6, ..., 30, 36
        assert_eq!(outcome, ProcessOutcome::Embedded { chunks: 7 });
        assert_eq!(store.records(doc.id).await.unwrap().len(), 7);

        let status = processor.registry().get(&doc.id).unwrap();
        assert_eq!(status.embedding_status, EmbeddingStatus::Completed);
        assert_eq!(status.total_chunks, 7);
    }

    #[tokio::test]
    async fn test_unchanged_text_is_not_reembedded() {
        let (processor, embedder, _store, doc) = setup(false);

        for _ in 0..2 {
            processor
                .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 1);

        let changed = format!("{} appendix", long_text());
        let outcome = processor
            .on_document_text_ready(doc.id, doc.user_id, changed, DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Embedded { .. }));
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reprocessing_replaces_records() {
        let (processor, _embedder, store, doc) = setup(false);

        processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();
        let shorter: String = (1..=10).map(|i| format!("word{} ", i)).collect();
        processor
            .on_document_text_ready(doc.id, doc.user_id, shorter, DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();

        let records = store.records(doc.id).await.unwrap();
        let indices: Vec<u32> = records.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_short_text_marked_failed_without_provider_call() {
        let (processor, embedder, store, doc) = setup(false);

        let outcome = processor
            .on_document_text_ready(doc.id, doc.user_id, "  tiny  ".to_string(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::NoText);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 0);
        assert!(store.is_empty().await.unwrap());
        let status = processor.registry().get(&doc.id).unwrap();
        assert_eq!(status.embedding_status, EmbeddingStatus::Failed);
        assert_eq!(status.processing_error.as_deref(), Some(NO_TEXT_EXTRACTED));
    }

    #[tokio::test]
    async fn test_provider_failure_is_isolated() {
        let (processor, _embedder, store, doc) = setup(true);

        let result = processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap();

        assert!(matches!(result, Err(Error::EmbeddingProvider(_))));
        assert!(store.is_empty().await.unwrap());
        let status = processor.registry().get(&doc.id).unwrap();
        assert_eq!(status.embedding_status, EmbeddingStatus::Failed);
        assert!(status.processing_error.unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_delete_removes_records_and_allows_reupload() {
        let (processor, embedder, store, doc) = setup(false);

        processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processor.on_document_deleted(doc.id).await.unwrap(), 7);
        assert!(processor.registry().get(&doc.id).is_none());
        assert!(store.is_empty().await.unwrap());
        assert!(processor.deleted.is_empty());
        assert!(processor.in_flight.is_empty());

        // same text again: nothing remembered, so it is embedded afresh
        let outcome = processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Embedded { chunks: 7 });
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 2);
        assert_eq!(store.records(doc.id).await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_runs_queued_behind_a_delete_are_cancelled() {
        let (processor, embedder, store, doc) = setup(false);

        // spawned but not yet polled when the delete runs
        let first = processor.on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf);
        let second = processor.on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf);
        assert_eq!(processor.on_document_deleted(doc.id).await.unwrap(), 0);
        assert!(processor.deleted.contains(&doc.id));

        assert_eq!(first.await.unwrap().unwrap(), ProcessOutcome::Cancelled);
        assert_eq!(second.await.unwrap().unwrap(), ProcessOutcome::Cancelled);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 0);
        assert!(store.is_empty().await.unwrap());

        // tombstone and lock go once nothing is in flight
        assert!(processor.deleted.is_empty());
        assert!(processor.locks.is_empty());
        assert!(processor.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_run_completes_reregistered_document() {
        let (processor, embedder, _store, doc) = setup(false);

        processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();

        // registered again with the same text: pending until the run reports
        processor.registry().insert(doc.clone());
        assert_eq!(
            processor.registry().get(&doc.id).unwrap().embedding_status,
            EmbeddingStatus::Pending
        );

        let outcome = processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Unchanged { chunks: 7 });
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 1);

        let status = processor.registry().get(&doc.id).unwrap();
        assert_eq!(status.embedding_status, EmbeddingStatus::Completed);
        assert_eq!(status.total_chunks, 7);
    }

    #[tokio::test]
    async fn test_unchanged_run_leaves_failed_status_alone() {
        let (processor, _embedder, _store, doc) = setup(false);

        processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();
        processor.registry().mark_failed(&doc.id, "extraction rerun failed").unwrap();

        processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();
        let status = processor.registry().get(&doc.id).unwrap();
        assert_eq!(status.embedding_status, EmbeddingStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_without_touching_records() {
        let embedder = Arc::new(CountingEmbedder {
            delay: Some(Duration::from_secs(600)),
            ..Default::default()
        });
        let store = Arc::new(InMemoryVectorStore::new());
        let registry = DocumentRegistry::new();
        let doc = Document::new(Uuid::new_v4(), "paper.pdf", DocumentType::Pdf, long_text(), Some(4));
        registry.insert(doc.clone());

        let mut config = config();
        config.processing.document_timeout_secs = 5;
        let processor = DocumentProcessor::new(embedder, store.clone(), registry, &config);

        let result = processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap();

        assert!(matches!(result, Err(Error::Internal(_))));
        assert!(store.is_empty().await.unwrap());
        let status = processor.registry().get(&doc.id).unwrap();
        assert_eq!(status.embedding_status, EmbeddingStatus::Failed);
        assert!(status.processing_error.unwrap().contains("timed out"));
    }

    /// In-memory store whose writes stall
    struct SlowWriteStore {
        inner: InMemoryVectorStore,
        delay: Duration,
    }

    #[async_trait]
    impl VectorStoreProvider for SlowWriteStore {
        async fn write(
            &self,
            document_id: Uuid,
            user_id: Uuid,
            chunks: &[Chunk],
            embeddings: &[Vec<f32>],
            document_type: DocumentType,
        ) -> Result<usize> {
            tokio::time::sleep(self.delay).await;
            self.inner
                .write(document_id, user_id, chunks, embeddings, document_type)
                .await
        }

        async fn search(
            &self,
            query_embedding: &[f32],
            document_id: Uuid,
            top_k: usize,
            pages: Option<&PageFilter>,
        ) -> Result<Vec<RetrievalResult>> {
            self.inner.search(query_embedding, document_id, top_k, pages).await
        }

        async fn records(&self, document_id: Uuid) -> Result<Vec<EmbeddingRecord>> {
            self.inner.records(document_id).await
        }

        async fn delete_all(&self, document_id: Uuid) -> Result<usize> {
            self.inner.delete_all(document_id).await
        }

        async fn dimensions(&self) -> Result<Option<usize>> {
            self.inner.dimensions().await
        }

        async fn len(&self) -> Result<usize> {
            self.inner.len().await
        }

        fn supports_approximate_search(&self) -> bool {
            false
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "slow-write"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_still_runs_to_completion() {
        let store = Arc::new(SlowWriteStore {
            inner: InMemoryVectorStore::new(),
            delay: Duration::from_secs(600),
        });
        let registry = DocumentRegistry::new();
        let doc = Document::new(Uuid::new_v4(), "paper.pdf", DocumentType::Pdf, long_text(), Some(4));
        registry.insert(doc.clone());

        let mut config = config();
        config.processing.document_timeout_secs = 5;
        let processor = DocumentProcessor::new(Arc::new(CountingEmbedder::default()), store.clone(), registry, &config);

        let outcome = processor
            .on_document_text_ready(doc.id, doc.user_id, long_text(), DocumentType::Pdf)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Embedded { chunks: 7 });
        assert_eq!(store.records(doc.id).await.unwrap().len(), 7);
        assert_eq!(
            processor.registry().get(&doc.id).unwrap().embedding_status,
            EmbeddingStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_unregistered_document_is_still_embedded() {
        let (processor, _embedder, store, _doc) = setup(false);
        let id = Uuid::new_v4();

        let outcome = processor
            .on_document_text_ready(id, Uuid::new_v4(), long_text(), DocumentType::Docx)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Embedded { .. }));
        assert!(!store.records(id).await.unwrap().is_empty());
    }
}
