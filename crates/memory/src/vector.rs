//! Vector similarity utilities.

use advisor_core::memory::{MemoryEntry, ScoredEntry};
use std::cmp::Ordering;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Ordering for search hits: similarity desc, then observation time desc,
/// then trust desc, then id for a total order.
pub fn compare_hits(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.entry.metadata.timestamp.cmp(&a.entry.metadata.timestamp))
        .then_with(|| {
            b.entry
                .trust_score
                .partial_cmp(&a.entry.trust_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

/// Score `candidates` against `query` and keep the best `k`.
pub fn rank_by_similarity<'a>(
    candidates: impl Iterator<Item = &'a MemoryEntry>,
    query: &[f32],
    k: usize,
) -> Vec<ScoredEntry> {
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<ScoredEntry> = candidates
        .map(|entry| ScoredEntry {
            similarity: cosine_similarity(&entry.embedding, query),
            entry: entry.clone(),
        })
        .collect();
    scored.sort_by(compare_hits);
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisor_core::memory::{MemoryMetadata, SourceType};
    use chrono::{Duration, Utc};

    fn entry(id: &str, embedding: Vec<f32>) -> MemoryEntry {
        let mut e = MemoryEntry::new(
            format!("Content for {id}"),
            embedding,
            "test",
            MemoryMetadata::new("acme", "p1", SourceType::Document),
            0.5,
        );
        e.id = id.into();
        e
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // 1 / sqrt(2)
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn ranks_by_similarity_and_truncates() {
        let query = vec![1.0, 0.0, 0.0];
        let entries = vec![
            entry("a", vec![0.0, 1.0, 0.0]),
            entry("b", vec![1.0, 0.0, 0.0]),
            entry("c", vec![0.5, 0.5, 0.0]),
        ];

        let results = rank_by_similarity(entries.iter(), &query, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.id, "b");
        assert_eq!(results[1].entry.id, "c");
    }

    #[test]
    fn ties_break_by_recency_then_trust() {
        let now = Utc::now();
        let mut old = entry("old", vec![1.0, 0.0]);
        old.metadata.timestamp = now - Duration::days(10);
        let mut new_low = entry("new_low", vec![1.0, 0.0]);
        new_low.metadata.timestamp = now;
        new_low.trust_score = 0.2;
        let mut new_high = entry("new_high", vec![1.0, 0.0]);
        new_high.metadata.timestamp = now;
        new_high.trust_score = 0.9;

        let entries = [old, new_low, new_high];
        let ids: Vec<_> = rank_by_similarity(entries.iter(), &[1.0, 0.0], 10)
            .into_iter()
            .map(|s| s.entry.id)
            .collect();
        assert_eq!(ids, vec!["new_high", "new_low", "old"]);
    }

    #[test]
    fn zero_k_returns_nothing() {
        let entries = [entry("a", vec![1.0])];
        assert!(rank_by_similarity(entries.iter(), &[1.0], 0).is_empty());
    }
}
