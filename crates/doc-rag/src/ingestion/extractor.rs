//! Text extraction seam
//!
//! Format parsing (PDF, DOCX, PPTX, OCR) lives outside this crate. Extractors
//! hand back plain text, optionally carrying `--- Page N ---` or
//! `--- Slide N ---` marker lines that the chunker picks up.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::types::DocumentType;

static MARKER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*---[ \t]{0,3}(?:Page|Slide)[ \t]{1,3}\d{1,6}[ \t]{0,3}---[ \t]*$")
        .expect("Invalid marker line regex")
});

/// Output of a text extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    /// Extracted text, possibly with page/slide markers
    pub text: String,
    /// Page or slide count, when the format has one
    pub page_count: Option<u32>,
}

/// Produces text from raw file bytes
pub trait TextExtractor: Send + Sync {
    /// Extract text from a document of the given type
    fn extract(&self, document_type: DocumentType, bytes: &[u8]) -> Result<ExtractedText>;

    /// Extractor name for logging
    fn name(&self) -> &str;
}

/// Extractor for text that was already pulled out of the source file
/// (UTF-8 sidecars written by an external parser).
///
/// The page count is the number of marker lines, or `None` when there are
/// none.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, document_type: DocumentType, bytes: &[u8]) -> Result<ExtractedText> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::internal(format!("{} text is not valid UTF-8: {}", document_type, e)))?
            .to_string();

        let markers = MARKER_LINE_RE.find_iter(&text).count() as u32;
        Ok(ExtractedText {
            text,
            page_count: (markers > 0).then_some(markers),
        })
    }

    fn name(&self) -> &str {
        "plain-text"
    }
}
