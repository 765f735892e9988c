//! Ingestion for Advisor: raw text in, committed memory entries out.
//!
//! Text is normalized, split into overlapping sentence-aligned chunks,
//! embedded in batches and committed to the memory store as one unit per
//! source document.

pub mod chunker;
pub mod normalize;
pub mod pipeline;

pub use chunker::{Chunk, ChunkPolicy, chunk, reconstruct};
pub use normalize::normalize;
pub use pipeline::{IngestRequest, IngestionPipeline, NewMemory};
