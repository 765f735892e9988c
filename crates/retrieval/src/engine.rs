//! The retrieval engine.

use advisor_config::RetrievalConfig;
use advisor_core::error::Error;
use advisor_core::memory::{MemoryStore, SearchFilters};
use advisor_core::provider::EmbeddingProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::rank::{RankWeights, RetrievedMemory, collapse_near_duplicates, rerank, truncate_to_budget};

/// Where to look and how much to bring back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalScope {
    #[serde(flatten)]
    pub filters: SearchFilters,
    /// Overrides the configured `top_k`.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Overrides the configured token budget.
    #[serde(default)]
    pub token_budget: Option<usize>,
}

impl RetrievalScope {
    pub fn new(filters: SearchFilters) -> Self {
        Self { filters, top_k: None, token_budget: None }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = Some(budget);
        self
    }
}

/// What came back, plus counters for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub items: Vec<RetrievedMemory>,
    /// Hits returned by the store before any filtering.
    pub candidates: usize,
    pub below_threshold: usize,
    pub collapsed: usize,
    /// Ranked items dropped by `top_k` or the token budget.
    pub truncated: usize,
}

impl RetrievalResult {
    /// No relevant memory. A valid outcome, not an error.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn memory_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.entry.id.clone()).collect()
    }

    pub fn total_tokens(&self) -> usize {
        self.items.iter().map(RetrievedMemory::tokens).sum()
    }
}

/// Render retrieved memory with source attribution, one block per item.
pub fn format_sources(items: &[RetrievedMemory]) -> String {
    if items.is_empty() {
        return "No relevant information found in memory.".to_string();
    }
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let meta = &item.entry.metadata;
        let _ = write!(out, "Source {}", i + 1);
        if !meta.customer_id.is_empty() {
            let _ = write!(out, " (Customer: {})", meta.customer_id);
        }
        if !meta.project_id.is_empty() {
            let _ = write!(out, " (Project: {})", meta.project_id);
        }
        let _ = write!(out, " [{}]:\n{}", item.entry.id, item.entry.text);
    }
    out
}

pub struct RetrievalEngine {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self { store, embedder, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn retrieve(&self, query: &str, scope: &RetrievalScope) -> Result<RetrievalResult, Error> {
        self.retrieve_at(query, scope, Utc::now()).await
    }

    /// Retrieve with an explicit clock for recency.
    pub async fn retrieve_at(
        &self,
        query: &str,
        scope: &RetrievalScope,
        now: DateTime<Utc>,
    ) -> Result<RetrievalResult, Error> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        let top_k = scope.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Ok(RetrievalResult::default());
        }

        let vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Internal("embedding provider returned no vector".into()))?;

        let pool = self.config.candidate_pool.max(top_k);
        let hits = self.store.search(&vector, &scope.filters, pool).await?;
        let candidates = hits.len();

        let threshold = self.config.similarity_threshold;
        let hits: Vec<_> = hits.into_iter().filter(|h| h.similarity >= threshold).collect();
        let below_threshold = candidates - hits.len();

        let (hits, collapsed) = collapse_near_duplicates(hits, self.config.dedup_threshold);

        let weights = RankWeights::new(self.config.alpha, self.config.beta, self.config.gamma);
        let mut ranked = rerank(hits, weights, self.config.recency_half_life_days, now);
        let ranked_len = ranked.len();
        ranked.truncate(top_k);

        let budget = scope.token_budget.unwrap_or(self.config.token_budget);
        let items = truncate_to_budget(ranked, budget);
        let truncated = ranked_len - items.len();

        debug!(
            candidates,
            below_threshold,
            collapsed,
            returned = items.len(),
            "Retrieval complete"
        );

        Ok(RetrievalResult {
            items,
            candidates,
            below_threshold,
            collapsed,
            truncated,
        })
    }
}
