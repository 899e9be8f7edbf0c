//! Keyword matching over stored chunk text and reciprocal rank fusion
//!
//! Keyword scores are TF-IDF over the document's own chunks. Scores are
//! normalized into `[0, 1)` so keyword-only hits can be held to the same
//! per-type thresholds as cosine scores.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::types::{EmbeddingRecord, RetrievalResult};

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("Invalid word regex"));

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "did", "do", "does", "for",
    "from", "how", "in", "is", "it", "me", "of", "on", "or", "page", "pages", "slide", "slides",
    "tell", "that", "the", "this", "to", "was", "what", "when", "where", "which", "who", "why",
    "with",
];

/// Keeps a keyword-only hit strictly below a perfect cosine match
const SCORE_SMOOTHING: f64 = 0.1;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD_RE.find_iter(text).map(|m| m.as_str().to_lowercase())
}

/// Distinct query terms worth matching
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(query)
        .filter(|w| w.chars().count() > 1 && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Rank records by keyword overlap with the query.
///
/// Records sharing no term with the query are left out. Ties break on chunk
/// index like every other ranking.
pub fn keyword_search(query: &str, records: &[EmbeddingRecord], top_k: usize) -> Vec<RetrievalResult> {
    let terms = query_terms(query);
    if terms.is_empty() || records.is_empty() {
        return Vec::new();
    }

    let term_counts: Vec<HashMap<String, usize>> = records
        .iter()
        .map(|record| {
            let mut counts = HashMap::new();
            for word in words(&record.chunk_text) {
                if terms.contains(&word) {
                    *counts.entry(word).or_insert(0) += 1;
                }
            }
            counts
        })
        .collect();

    let total = records.len() as f64;
    let idf: HashMap<&str, f64> = terms
        .iter()
        .map(|term| {
            let df = term_counts.iter().filter(|c| c.contains_key(term)).count() as f64;
            (term.as_str(), (1.0 + total / df.max(1.0)).ln())
        })
        .collect();

    let mut scored: Vec<(usize, f64)> = term_counts
        .iter()
        .enumerate()
        .map(|(i, counts)| {
            let score = counts
                .iter()
                .map(|(term, &tf)| (1.0 + (tf as f64).ln()) * idf[term.as_str()])
                .sum::<f64>();
            (i, score)
        })
        .filter(|&(_, score)| score > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| records[a.0].chunk_index.cmp(&records[b.0].chunk_index))
    });
    scored.truncate(top_k);

    let best = scored.first().map(|&(_, score)| score).unwrap_or(1.0);
    scored
        .into_iter()
        .map(|(i, score)| {
            let normalized = (score / (best + SCORE_SMOOTHING)).min(1.0);
            RetrievalResult::from_record(&records[i], normalized as f32)
        })
        .collect()
}

/// Merge two rankings of the same document by reciprocal rank fusion.
///
/// Each list contributes `1 / (k + rank)` per chunk (rank is 1-based).
/// Results keep the similarity of their first appearance, vector ranking
/// first, so thresholds still compare cosine scores wherever one exists.
pub fn fuse_rankings(
    vector: Vec<RetrievalResult>,
    keyword: Vec<RetrievalResult>,
    k: f32,
    top_k: usize,
) -> Vec<RetrievalResult> {
    let k = k as f64;
    let mut fused: Vec<(RetrievalResult, f64)> = Vec::with_capacity(vector.len() + keyword.len());
    let mut position: HashMap<u32, usize> = HashMap::new();

    for ranking in [vector, keyword] {
        for (rank, result) in ranking.into_iter().enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            match position.get(&result.chunk_index) {
                Some(&i) => fused[i].1 += contribution,
                None => {
                    position.insert(result.chunk_index, fused.len());
                    fused.push((result, contribution));
                }
            }
        }
    }

    fused.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.0.chunk_index.cmp(&b.0.chunk_index))
    });
    fused.into_iter().take(top_k).map(|(result, _)| result).collect()
}
