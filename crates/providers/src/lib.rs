//! Model providers for Advisor.
//!
//! Embedding and generation backends implement the traits in
//! `advisor_core::provider`. The factory builds them from configuration,
//! each wrapped in a retry policy with per-attempt timeouts.

pub mod factory;
pub mod hash_embedder;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod openai_compat;
pub mod retry;

pub use factory::{build_embedder, build_generator};
pub use hash_embedder::HashEmbedder;
pub use openai_compat::{OpenAiCompatEmbedder, OpenAiCompatProvider};
pub use retry::{RetryPolicy, RetryingEmbedder, RetryingGenerator};
