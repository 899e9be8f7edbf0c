//! Token-window chunking with page and slide tracking
//!
//! Text is split into approximate tokens (words, with long words cut into
//! pieces). Page markers emitted by the extractor (`--- Page N ---`,
//! `--- Slide N ---`) always form a single token so a chunk boundary never
//! lands inside one. Chunks are verbatim slices of the input: every token
//! carries the whitespace that follows it, so the chunks tile the text with
//! no gaps.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

use crate::config::ChunkParams;
use crate::error::Result;
use crate::types::{Chunk, ChunkType};

/// Upper bound on the characters a single token can span, trailing
/// whitespace included. A chunk of `n` tokens is at most `n` times this.
pub const MAX_TOKEN_CHARS: usize = 40;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"---[ \t]{0,3}(Page|Slide)[ \t]{1,3}(\d{1,6})[ \t]{0,3}---")
        .expect("Invalid marker regex")
});

// Marker first so it wins over the word alternative at the same position.
// Words longer than 20 characters are cut into pieces. Whitespace runs of five or more become their own tokens; shorter gaps
// attach to the preceding token.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"---[ \t]{0,3}(?:Page|Slide)[ \t]{1,3}\d{1,6}[ \t]{0,3}---|\S{1,20}|\s{5,20}")
        .expect("Invalid token regex")
});

/// Character ceiling for a chunk built from `target_size` tokens
pub fn max_chunk_chars(target_size: usize) -> usize {
    target_size.saturating_mul(MAX_TOKEN_CHARS)
}

/// Split text into token byte ranges that tile it exactly
pub fn token_spans(text: &str) -> Vec<Range<usize>> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let starts: Vec<usize> = TOKEN_RE.find_iter(text).map(|m| m.start()).collect();
    let mut spans = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let start = if i == 0 { 0 } else { start };
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        spans.push(start..end);
    }
    spans
}

/// Approximate token count of a text
pub fn estimate_tokens(text: &str) -> usize {
    token_spans(text).len()
}

/// First page/slide marker in a text, with its captured number
pub fn find_marker(text: &str) -> Option<u32> {
    MARKER_RE
        .captures(text)
        .and_then(|caps| caps.get(2))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|n| n.max(1))
}

/// Page estimate used when a chunk carries no marker.
///
/// This is a heuristic with no accuracy guarantee; callers must treat it as
/// approximate.
pub fn positional_page_estimate(chunk_index: u32) -> u32 {
    chunk_index / 2 + 1
}

/// Normalize extracted text before chunking: collapse runs of spaces and
/// tabs, trim lines, and keep at most one blank line between paragraphs.
pub fn clean_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut last_blank = true;

    for line in raw.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !last_blank {
                lines.push(String::new());
                last_blank = true;
            }
            continue;
        }
        lines.push(collapsed);
        last_blank = false;
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Text chunker with a token budget and overlap
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    params: ChunkParams,
}

impl TextChunker {
    /// Create a chunker; fails unless `0 < overlap < target_size`
    pub fn new(params: ChunkParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Configured parameters
    pub fn params(&self) -> ChunkParams {
        self.params
    }

    /// Split cleaned text into overlapping chunks.
    ///
    /// Consecutive chunks share exactly `overlap` tokens; the last chunk may
    /// be shorter than `target_size`. Empty or whitespace-only text yields no
    /// chunks.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let spans = token_spans(text);
        if spans.is_empty() {
            return Vec::new();
        }

        let ChunkParams { target_size, overlap } = self.params;
        let step = target_size - overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let end = (start + target_size).min(spans.len());
            let byte_range = spans[start].start..spans[end - 1].end;
            let chunk_text = &text[byte_range.clone()];
            let chunk_index = chunks.len() as u32;

            let marker = find_marker(chunk_text);
            chunks.push(Chunk {
                text: chunk_text.to_string(),
                chunk_index,
                page_number: marker.unwrap_or_else(|| positional_page_estimate(chunk_index)),
                page_from_marker: marker.is_some(),
                char_start: byte_range.start,
                char_end: byte_range.end,
                chunk_type: ChunkType::detect(chunk_text),
            });

            if end == spans.len() {
                break;
            }
            start += step;
        }

        tracing::debug!(
            "Chunked {} tokens into {} chunks (target {}, overlap {})",
            spans.len(),
            chunks.len(),
            target_size,
            overlap
        );
        chunks
    }
}

/// Chunk `text` with the given token budget and overlap
pub fn chunk_text(text: &str, target_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    Ok(TextChunker::new(ChunkParams::new(target_size, overlap))?.chunk(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    fn reconstruct(text: &str, chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for chunk in chunks {
            assert!(chunk.char_start <= covered, "gap before chunk {}", chunk.chunk_index);
            out.push_str(&text[covered..chunk.char_end]);
            covered = chunk.char_end;
        }
        out
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(chunk_text("a b c", 10, 0), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(chunk_text("a b c", 10, 10), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(chunk_text("a b c", 5, 8), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(chunk_text("", 10, 2).unwrap().is_empty());
        assert!(chunk_text("   \n\t   \n        ", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = chunk_text("just a few words", 10, 2).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "just a few words");
        assert_eq!(chunks[0].page_number, 1);
        assert!(!chunks[0].page_from_marker);
    }

    #[test]
    fn test_coverage_reconstructs_text() {
        let text = format!("  {}\n\n{}  ", words(37), words(12));
        let chunks = chunk_text(&text, 10, 3).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.text, &text[chunk.char_start..chunk.char_end]);
            assert!(!chunk.text.is_empty());
        }
        assert_eq!(reconstruct(&text, &chunks), text);
    }

    #[test]
    fn test_adjacent_chunks_share_overlap_tokens() {
        let text = words(53);
        let overlap = 4;
        let chunks = chunk_text(&text, 12, overlap).unwrap();

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.char_start < prev.char_end);
            let shared = &text[next.char_start..prev.char_end];
            assert_eq!(estimate_tokens(shared), overlap);
            assert!(prev.text.ends_with(shared));
            assert!(next.text.starts_with(shared));
        }
    }

    #[test]
    fn test_final_chunk_may_be_short() {
        let chunks = chunk_text(&words(25), 10, 2).unwrap();
        // windows start at 0, 8, 16 -> last covers tokens 16..25
        assert_eq!(chunks.len(), 3);
        assert_eq!(estimate_tokens(&chunks[2].text), 9);
    }

    #[test]
    fn test_marker_sets_page_number() {
        let text = format!("{}\n--- Page 7 ---\n{}", words(3), words(3));
        let chunks = chunk_text(&text, 20, 2).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 7);
        assert!(chunks[0].page_from_marker);

        let slides = chunk_text("--- Slide 12 ---\nRoadmap", 20, 2).unwrap();
        assert_eq!(slides[0].page_number, 12);
    }

    #[test]
    fn test_marker_is_never_split() {
        let text = format!("{} --- Page 3 --- {}", words(4), words(20));
        // target 5 would otherwise cut right through the four-word marker
        let chunks = chunk_text(&text, 5, 1).unwrap();

        let with_marker: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.text.contains("Page 3"))
            .collect();
        assert!(!with_marker.is_empty());
        for chunk in with_marker {
            assert!(chunk.text.contains("--- Page 3 ---"));
            assert_eq!(chunk.page_number, 3);
        }
        assert!(chunks.iter().all(|c| !c.text.trim_end().ends_with("Page")));
    }

    #[test]
    fn test_positional_estimate_without_markers() {
        let chunks = chunk_text(&words(60), 10, 2).unwrap();
        let pages: Vec<u32> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(&pages[..5], &[1, 1, 2, 2, 3]);
        assert!(chunks.iter().all(|c| !c.page_from_marker));
    }

    #[test]
    fn test_long_words_respect_char_ceiling() {
        let text = "x".repeat(500) + " tail";
        let chunks = chunk_text(&text, 4, 1).unwrap();

        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= max_chunk_chars(4));
        }
        assert_eq!(reconstruct(&text, &chunks), text);
    }

    #[test]
    fn test_chunk_indices_are_sequential() {
        let chunks = chunk_text(&words(100), 10, 5).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
        }
    }

    #[test]
    fn test_clean_text() {
        let raw = "  Title   line \n\n\n\nBody\twith   tabs\n   \n--- Page 2 ---\nmore  \n\n";
        assert_eq!(
            clean_text(raw),
            "Title line\n\nBody with tabs\n\n--- Page 2 ---\nmore"
        );
        assert_eq!(clean_text("  \n \n"), "");
    }
}
