//! Versioned memory store for Advisor.
//!
//! [`InMemoryStore`] implements [`advisor_core::memory::MemoryStore`] with
//! optimistic versioning, soft deletes, cosine similarity search, and JSONL
//! snapshot persistence.

pub mod snapshot;
pub mod store;
pub mod vector;

pub use snapshot::SnapshotReport;
pub use store::InMemoryStore;
pub use vector::{cosine_similarity, rank_by_similarity};
