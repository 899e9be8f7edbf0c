//! Context assembly with citation tracking

use crate::config::ContextConfig;
use crate::providers::truncate_chars;
use crate::types::{AssembledContext, ChunkType, Document, RetrievalResult};

const BLOCK_SEPARATOR: &str = "\n\n";

/// Merges ranked chunks into a bounded prompt context.
///
/// Pure data transformation: no I/O, no side effects.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    raw_text_fallback_chars: usize,
    max_context_chars: usize,
    /// Indexed by `type_slot`
    type_limits: [usize; 3],
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            raw_text_fallback_chars: config.raw_text_fallback_chars,
            max_context_chars: config.max_context_chars,
            type_limits: [
                config.max_text_chunks,
                config.max_table_chunks,
                config.max_image_chunks,
            ],
        }
    }

    /// Build the context for a set of ranked results.
    ///
    /// With no results the first characters of the raw document text become
    /// the context and no pages are cited. Otherwise each result becomes a
    /// `[Context i]` block in rank order until the character bound is hit.
    /// Results beyond the per-type limits (text, table, image) are skipped
    /// so one kind of chunk cannot crowd out the others.
    pub fn assemble(&self, results: &[RetrievalResult], document: &Document) -> AssembledContext {
        if results.is_empty() {
            return self.raw_text_context(document);
        }

        let citation_label = results[0]
            .citation_label()
            .unwrap_or_else(|| document.citation_label());

        let mut context = String::new();
        let mut page_references = Vec::new();
        let mut chunks_used = 0;
        let mut per_type = [0usize; 3];

        for result in results {
            let slot = type_slot(result.chunk_type);
            if per_type[slot] >= self.type_limits[slot] {
                continue;
            }

            let n = chunks_used + 1;
            let header = match result.page_number {
                Some(page) => format!(
                    "[Context {}] {} {} ({})",
                    n,
                    citation_label,
                    page,
                    result.chunk_type.as_str()
                ),
                None => format!("[Context {}] ({})", n, result.chunk_type.as_str()),
            };
            let block = format!("{}\n{}", header, result.chunk_text.trim());

            let used = context.chars().count();
            let separator = if context.is_empty() { 0 } else { BLOCK_SEPARATOR.len() };
            let block_chars = block.chars().count();

            if used + separator + block_chars > self.max_context_chars {
                if chunks_used == 0 {
                    // A single oversized chunk is cut rather than dropped
                    context.push_str(truncate_chars(&block, self.max_context_chars));
                    chunks_used = 1;
                    push_page(&mut page_references, result.page_number);
                } else {
                    tracing::debug!(
                        "Context bound of {} chars reached after {} chunks",
                        self.max_context_chars,
                        chunks_used
                    );
                }
                break;
            }

            if !context.is_empty() {
                context.push_str(BLOCK_SEPARATOR);
            }
            context.push_str(&block);
            chunks_used += 1;
            per_type[slot] += 1;
            push_page(&mut page_references, result.page_number);
        }

        if chunks_used == 0 {
            tracing::debug!("Every result exceeded its type limit, using raw text");
            return self.raw_text_context(document);
        }

        AssembledContext {
            context,
            page_references,
            citation_label,
            chunks_used,
            from_raw_text: false,
        }
    }

    /// Context built from raw document text alone
    pub fn raw_text_context(&self, document: &Document) -> AssembledContext {
        AssembledContext {
            context: truncate_chars(&document.extracted_text, self.raw_text_fallback_chars).to_string(),
            page_references: Vec::new(),
            citation_label: document.citation_label(),
            chunks_used: 0,
            from_raw_text: true,
        }
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(&ContextConfig::default())
    }
}

fn type_slot(chunk_type: ChunkType) -> usize {
    match chunk_type {
        ChunkType::Text => 0,
        ChunkType::Table => 1,
        ChunkType::Image => 2,
    }
}

/// Record a page once, keeping first-seen order
fn push_page(pages: &mut Vec<u32>, page: Option<u32>) {
    if let Some(page) = page {
        if !pages.contains(&page) {
            pages.push(page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkType, CitationLabel, DocumentType, META_DOCUMENT_TYPE};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn typed(chunk_index: u32, chunk_type: ChunkType) -> RetrievalResult {
        RetrievalResult {
            chunk_type,
            ..result(chunk_index, Some(chunk_index + 1), Some("pdf"))
        }
    }

    fn result(chunk_index: u32, page: Option<u32>, tag: Option<&str>) -> RetrievalResult {
        let mut metadata = HashMap::new();
        if let Some(tag) = tag {
            metadata.insert(META_DOCUMENT_TYPE.to_string(), serde_json::json!(tag));
        }
        RetrievalResult {
            chunk_text: format!("text of chunk {}", chunk_index),
            page_number: page,
            chunk_index,
            similarity: 0.9,
            chunk_type: ChunkType::Text,
            metadata,
        }
    }

    fn document(document_type: DocumentType, text: &str) -> Document {
        Document::new(Uuid::new_v4(), "file", document_type, text, None)
    }

    #[test]
    fn test_blocks_and_deduplicated_pages() {
        let results = vec![
            result(4, Some(3), Some("pdf")),
            result(1, Some(1), Some("pdf")),
            result(5, Some(3), Some("pdf")),
            result(7, None, Some("pdf")),
        ];
        let ctx = ContextAssembler::default().assemble(&results, &document(DocumentType::Pdf, ""));

        assert!(ctx.context.starts_with("[Context 1] Page 3 (text)\ntext of chunk 4"));
        assert!(ctx.context.contains("[Context 4] (text)\ntext of chunk 7"));
        assert_eq!(ctx.page_references, vec![3, 1]);
        assert_eq!(ctx.citation_label, CitationLabel::Page);
        assert_eq!(ctx.chunks_used, 4);
        assert!(!ctx.from_raw_text);
    }

    #[test]
    fn test_label_from_first_result_metadata() {
        // Stored metadata wins over the document's own type
        let results = vec![result(0, Some(2), Some("pptx")), result(1, Some(3), Some("pdf"))];
        let ctx = ContextAssembler::default().assemble(&results, &document(DocumentType::Pdf, ""));
        assert_eq!(ctx.citation_label, CitationLabel::Slide);
        assert!(ctx.context.contains("Slide 2"));
    }

    #[test]
    fn test_label_falls_back_to_document_type() {
        let results = vec![result(0, Some(2), None)];
        let ctx = ContextAssembler::default().assemble(&results, &document(DocumentType::Pptx, ""));
        assert_eq!(ctx.citation_label, CitationLabel::Slide);
    }

    #[test]
    fn test_empty_results_use_raw_text() {
        let text = "é".repeat(2500);
        let ctx = ContextAssembler::default().assemble(&[], &document(DocumentType::Docx, &text));

        assert!(ctx.from_raw_text);
        assert_eq!(ctx.context.chars().count(), 2000);
        assert!(ctx.page_references.is_empty());
        assert_eq!(ctx.citation_label, CitationLabel::Page);
        assert_eq!(ctx.chunks_used, 0);
    }

    #[test]
    fn test_context_bound() {
        let config = ContextConfig {
            max_context_chars: 70,
            ..Default::default()
        };
        let results = vec![result(0, Some(1), None), result(1, Some(2), None), result(2, Some(9), None)];
        let ctx = ContextAssembler::new(&config).assemble(&results, &document(DocumentType::Pdf, ""));

        assert!(ctx.context.chars().count() <= 70);
        assert_eq!(ctx.chunks_used, 1);
        assert_eq!(ctx.page_references, vec![1]);
    }

    #[test]
    fn test_oversized_first_chunk_is_cut() {
        let config = ContextConfig {
            max_context_chars: 20,
            ..Default::default()
        };
        let ctx = ContextAssembler::new(&config)
            .assemble(&[result(0, Some(5), None)], &document(DocumentType::Pdf, ""));

        assert_eq!(ctx.context.chars().count(), 20);
        assert_eq!(ctx.chunks_used, 1);
        assert_eq!(ctx.page_references, vec![5]);
    }

    #[test]
    fn test_per_type_limits_keep_rank_order() {
        let results: Vec<RetrievalResult> = vec![
            typed(0, ChunkType::Table),
            typed(1, ChunkType::Text),
            typed(2, ChunkType::Table),
            typed(3, ChunkType::Table),
            typed(4, ChunkType::Image),
            typed(5, ChunkType::Text),
            typed(6, ChunkType::Text),
            typed(7, ChunkType::Text),
            typed(8, ChunkType::Text),
            typed(9, ChunkType::Image),
            typed(10, ChunkType::Image),
        ];
        let ctx = ContextAssembler::default().assemble(&results, &document(DocumentType::Pdf, ""));

        // 4 text, 2 table, 2 image; chunks 3, 8 and 10 are over their limits
        assert_eq!(ctx.chunks_used, 8);
        assert_eq!(ctx.page_references, vec![1, 2, 3, 5, 6, 7, 8, 10]);
        assert!(ctx.context.contains("[Context 4] Page 5 (image)"));
        assert!(ctx.context.contains("[Context 8] Page 10 (image)"));
        assert!(!ctx.context.contains("text of chunk 8"));
    }

    #[test]
    fn test_results_excluded_by_type_limits_use_raw_text() {
        let config = ContextConfig {
            max_image_chunks: 0,
            ..Default::default()
        };
        let ctx = ContextAssembler::new(&config).assemble(
            &[typed(0, ChunkType::Image)],
            &document(DocumentType::Pdf, "raw body"),
        );
        assert!(ctx.from_raw_text);
        assert_eq!(ctx.context, "raw body");
        assert_eq!(ctx.chunks_used, 0);
    }
}
