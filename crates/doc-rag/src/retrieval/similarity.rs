//! Cosine similarity and exact ranking

use crate::error::{Error, Result};
use crate::types::{rank_results, EmbeddingRecord, RetrievalResult};

/// `dot(a, b) / (|a| * |b|)`, accumulated in f64.
///
/// Vectors of different length fail with `DimensionMismatch`; a
/// zero-magnitude vector fails with `ZeroMagnitude`. NaN or infinite
/// components fail with `NonFiniteVector` instead of producing a NaN score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if !(dot.is_finite() && norm_a.is_finite() && norm_b.is_finite()) {
        return Err(Error::NonFiniteVector);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(Error::ZeroMagnitude);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// Score every record against the query and keep the best `top_k`.
///
/// Ordering is similarity descending with ties broken by ascending chunk
/// index, so identical inputs always give identical output.
pub fn rank_by_similarity<'a>(
    query: &[f32],
    records: impl IntoIterator<Item = &'a EmbeddingRecord>,
    top_k: usize,
) -> Result<Vec<RetrievalResult>> {
    let mut results = records
        .into_iter()
        .map(|record| {
            cosine_similarity(query, &record.embedding)
                .map(|score| RetrievalResult::from_record(record, score))
        })
        .collect::<Result<Vec<_>>>()?;

    rank_results(&mut results, top_k);
    Ok(results)
}
