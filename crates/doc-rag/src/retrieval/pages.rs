//! Page and slide references in questions
//!
//! "What does page 30 say", "pages 10-15", "slides 5 to 8" and "p. 4" are
//! recognized. Ranges are expanded, and a small window of neighbouring pages
//! is added so chunks that straddle a page boundary stay reachable.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::types::PageFilter;

/// Widest range expanded from a single reference
pub const MAX_RANGE_PAGES: u32 = 200;

static PAGE_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:pages?|pgs?|p\.|slides?)\s*(\d{1,6})(?:\s*(?:-|to|through)\s*(\d{1,6}))?\b")
        .expect("Invalid page reference regex")
});

static PAGE_CONTENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:explain|describe|show|what'?s?\s+(?:on|in)|content\s+of|tell\s+me\s+about)\s+(?:page|slide)\s+\d+",
    )
    .expect("Invalid page content regex")
});

/// Pages or slides named in a question, ascending and deduplicated
pub fn detect_pages(question: &str) -> Vec<u32> {
    let mut pages = BTreeSet::new();

    for caps in PAGE_REF_RE.captures_iter(question) {
        let Some(first) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        match caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) {
            Some(last) => {
                let (from, to) = if first <= last { (first, last) } else { (last, first) };
                let to = to.min(from.saturating_add(MAX_RANGE_PAGES - 1));
                pages.extend(from..=to);
            }
            None => {
                pages.insert(first);
            }
        }
    }

    pages.remove(&0);
    pages.into_iter().collect()
}

/// Add `window` neighbouring pages on each side, never going below page 1
pub fn expand_with_window(pages: &[u32], window: u32) -> Vec<u32> {
    let mut expanded = BTreeSet::new();
    for &page in pages {
        let from = page.saturating_sub(window).max(1);
        let to = page.saturating_add(window);
        expanded.extend(from..=to);
    }
    expanded.into_iter().collect()
}

/// Filter for the pages a question names, widened by `window`
pub fn page_filter_for(question: &str, window: u32) -> Option<PageFilter> {
    let pages = detect_pages(question);
    if pages.is_empty() {
        return None;
    }
    Some(PageFilter::new(expand_with_window(&pages, window)))
}

/// Whether the question asks for everything on a page ("explain page 4",
/// "what's on slide 2") rather than for something specific
pub fn is_page_content_query(question: &str) -> bool {
    PAGE_CONTENT_RE.is_match(question)
}
