//! Retrieval for Advisor.
//!
//! A query is embedded, searched against the memory store within a scope,
//! then filtered, deduplicated, reranked and cut to a token budget.

pub mod engine;
pub mod rank;
pub mod token;

pub use engine::{RetrievalEngine, RetrievalResult, RetrievalScope, format_sources};
pub use rank::{
    RankWeights, RetrievedMemory, collapse_near_duplicates, recency_decay, rerank,
    truncate_to_budget,
};
pub use token::estimate_tokens;
