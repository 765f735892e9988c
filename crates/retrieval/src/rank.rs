//! Post-search ranking steps. All pure functions over search hits.

use advisor_core::memory::{MemoryEntry, ScoredEntry};
use advisor_memory::cosine_similarity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::token::estimate_tokens;

/// A reranked hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedMemory {
    pub entry: MemoryEntry,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Recency factor in (0, 1].
    pub recency: f32,
    /// Blended score used for ordering.
    pub score: f32,
}

impl RetrievedMemory {
    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.entry.text)
    }
}

/// Blend weights for `score = alpha*similarity + beta*trust + gamma*recency`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankWeights {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl RankWeights {
    pub fn new(alpha: f32, beta: f32, gamma: f32) -> Self {
        Self { alpha, beta, gamma }
    }
}

/// Exponential decay with the given half-life. 1.0 at zero age, strictly
/// decreasing after. Future timestamps count as zero age.
pub fn recency_decay(observed: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f32 {
    let age_secs = (now - observed).num_seconds().max(0) as f64;
    let age_days = age_secs / 86_400.0;
    let half_life = if half_life_days > 0.0 { half_life_days } else { 1.0 };
    0.5f64.powf(age_days / half_life) as f32
}

/// Merge hits whose embeddings are more similar than `threshold`, keeping
/// the one with the higher trust score. Input order is preserved for the
/// survivors. Returns the survivors and how many were merged away.
pub fn collapse_near_duplicates(hits: Vec<ScoredEntry>, threshold: f32) -> (Vec<ScoredEntry>, usize) {
    let mut kept: Vec<ScoredEntry> = Vec::with_capacity(hits.len());
    let mut collapsed = 0;
    for hit in hits {
        let duplicate = kept
            .iter()
            .position(|k| cosine_similarity(&k.entry.embedding, &hit.entry.embedding) > threshold);
        match duplicate {
            Some(i) => {
                collapsed += 1;
                if hit.entry.trust_score > kept[i].entry.trust_score {
                    kept[i] = hit;
                }
            }
            None => kept.push(hit),
        }
    }
    (kept, collapsed)
}

/// Score and sort hits. Ties fall back to similarity, then observation
/// time, then trust, then id.
pub fn rerank(
    hits: Vec<ScoredEntry>,
    weights: RankWeights,
    half_life_days: f64,
    now: DateTime<Utc>,
) -> Vec<RetrievedMemory> {
    let mut ranked: Vec<RetrievedMemory> = hits
        .into_iter()
        .map(|hit| {
            let recency = recency_decay(hit.entry.metadata.timestamp, now, half_life_days);
            let score = weights.alpha * hit.similarity
                + weights.beta * hit.entry.trust_score
                + weights.gamma * recency;
            RetrievedMemory {
                entry: hit.entry,
                similarity: hit.similarity,
                recency,
                score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal))
            .then_with(|| b.entry.metadata.timestamp.cmp(&a.entry.metadata.timestamp))
            .then_with(|| {
                b.entry
                    .trust_score
                    .partial_cmp(&a.entry.trust_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    ranked
}

/// The longest prefix whose estimated tokens fit in `budget`.
pub fn truncate_to_budget(items: Vec<RetrievedMemory>, budget: usize) -> Vec<RetrievedMemory> {
    let mut used = 0;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let cost = item.tokens();
        if used + cost > budget {
            break;
        }
        used += cost;
        out.push(item);
    }
    out
}
