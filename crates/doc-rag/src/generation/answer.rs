//! Question answering over one document

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::retrieval::RetrievalEngine;
use crate::types::{Answer, AssembledContext, ConversationTurn, Document, RetrievalTier};

use super::context::ContextAssembler;
use super::prompt::{Prompt, PromptBuilder};

/// External text generator consuming an assembled prompt
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce an answer for the prompt; `history` carries prior turns as
    /// separate messages for chat-style generators
    async fn generate(&self, prompt: &Prompt, history: &[ConversationTurn]) -> Result<String>;

    /// Generator name for logging
    fn name(&self) -> &str;
}

/// Evidence and prompt prepared for one question
#[derive(Debug, Clone)]
pub struct PreparedQuestion {
    pub prompt: Prompt,
    pub context: AssembledContext,
    /// `None` when retrieval failed and raw text was used
    pub served_by: Option<RetrievalTier>,
}

/// Runs retrieve -> assemble -> prompt -> generate
pub struct AnswerService {
    engine: Arc<RetrievalEngine>,
    assembler: ContextAssembler,
    generator: Arc<dyn AnswerGenerator>,
    history_turns: usize,
}

impl AnswerService {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        assembler: ContextAssembler,
        generator: Arc<dyn AnswerGenerator>,
        history_turns: usize,
    ) -> Self {
        Self {
            engine,
            assembler,
            generator,
            history_turns,
        }
    }

    /// Retrieve evidence and build the prompt.
    ///
    /// `candidates` bounds each retrieval strategy before the similarity
    /// floors and per-type context limits apply. Retrieval errors never fail
    /// the question: the context degrades to the document's raw text.
    pub async fn prepare(
        &self,
        question: &str,
        document: &Document,
        history: &[ConversationTurn],
        candidates: Option<usize>,
    ) -> PreparedQuestion {
        let candidates = candidates.unwrap_or_else(|| self.engine.candidate_pool());

        let (context, served_by) = match self
            .engine
            .retrieve_relevant(question, document.id, candidates)
            .await
        {
            Ok(retrieval) => (
                self.assembler.assemble(&retrieval.results, document),
                Some(retrieval.served_by),
            ),
            Err(e) => {
                tracing::warn!(
                    "Retrieval failed for document {}, answering from raw text: {}",
                    document.id,
                    e
                );
                (self.assembler.raw_text_context(document), None)
            }
        };

        let prompt = PromptBuilder::build(question, &context, document, history, self.history_turns);
        PreparedQuestion {
            prompt,
            context,
            served_by,
        }
    }

    /// Answer a question about a document
    pub async fn answer(
        &self,
        question: &str,
        document: &Document,
        history: &[ConversationTurn],
        candidates: Option<usize>,
    ) -> Result<Answer> {
        let prepared = self.prepare(question, document, history, candidates).await;

        let start = history.len().saturating_sub(self.history_turns);
        tracing::info!(
            "Generating answer with {} from {} chunks",
            self.generator.name(),
            prepared.context.chunks_used
        );
        let text = self
            .generator
            .generate(&prepared.prompt, &history[start..])
            .await?;

        Ok(Answer {
            text,
            page_references: prepared.context.page_references,
            citation_label: prepared.context.citation_label,
            served_by: prepared.served_by,
            chunks_used: prepared.context.chunks_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::error::Error;
    use crate::providers::{EmbeddingProvider, InMemoryVectorStore, VectorStoreProvider};
    use crate::types::{Chunk, ChunkType, CitationLabel, DocumentType};
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.fail {
                Err(Error::embedding("provider down"))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0]; texts.len()])
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(!self.fail)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Echoes the prompt back so tests can inspect it
    #[derive(Default)]
    struct EchoGenerator {
        seen_history: Mutex<usize>,
    }

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn generate(&self, prompt: &Prompt, history: &[ConversationTurn]) -> Result<String> {
            *self.seen_history.lock() = history.len();
            Ok(prompt.user.clone())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    async fn service(fail: bool) -> (AnswerService, Arc<EchoGenerator>, Document) {
        let store = Arc::new(InMemoryVectorStore::new());
        let doc = Document::new(
            Uuid::new_v4(),
            "deck.pptx",
            DocumentType::Pptx,
            "Raw deck text about the roadmap",
            Some(3),
        );
        let chunk = Chunk {
            text: "--- Slide 3 ---\nRoadmap for next year".to_string(),
            chunk_index: 0,
            page_number: 3,
            page_from_marker: true,
            char_start: 0,
            char_end: 36,
            chunk_type: ChunkType::Text,
        };
        store
            .write(doc.id, doc.user_id, &[chunk], &[vec![1.0, 0.0]], DocumentType::Pptx)
            .await
            .unwrap();

        let engine = Arc::new(RetrievalEngine::new(
            Arc::new(FixedEmbedder { fail }),
            store,
            RetrievalConfig::default(),
        ));
        let generator = Arc::new(EchoGenerator::default());
        let service = AnswerService::new(engine, ContextAssembler::default(), generator.clone(), 2);
        (service, generator, doc)
    }

    #[tokio::test]
    async fn test_answer_with_retrieved_context() {
        let (service, generator, doc) = service(false).await;
        let history = vec![
            ConversationTurn::user("a"),
            ConversationTurn::assistant("b"),
            ConversationTurn::user("c"),
        ];
        let answer = service.answer("What is planned?", &doc, &history, None).await.unwrap();

        assert_eq!(answer.page_references, vec![3]);
        assert_eq!(answer.citation_label, CitationLabel::Slide);
        assert_eq!(answer.served_by, Some(RetrievalTier::VectorIndex));
        assert_eq!(answer.chunks_used, 1);
        assert!(answer.text.contains("Roadmap for next year"));
        assert_eq!(*generator.seen_history.lock(), 2);
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_raw_text() {
        let (service, _generator, doc) = service(true).await;
        let answer = service.answer("What is planned?", &doc, &[], Some(3)).await.unwrap();

        assert_eq!(answer.served_by, None);
        assert!(answer.page_references.is_empty());
        assert_eq!(answer.chunks_used, 0);
        assert!(answer.text.contains("Raw deck text about the roadmap"));
    }

    #[tokio::test]
    async fn test_page_content_question_skips_embedding() {
        // the embedder is down, but whole-slide requests never call it
        let (service, _generator, doc) = service(true).await;
        let answer = service.answer("Explain slide 3", &doc, &[], None).await.unwrap();

        assert_eq!(answer.served_by, Some(RetrievalTier::PageContent));
        assert_eq!(answer.page_references, vec![3]);
        assert!(answer.text.contains("Roadmap for next year"));
    }
}
