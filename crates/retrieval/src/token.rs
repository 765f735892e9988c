//! Token estimation.
//!
//! Character-based heuristic: ~4 characters per token. Close enough for
//! budgeting against BPE tokenizers on English text.

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Per-message overhead for role markers and delimiters.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate tokens for a chat message including overhead.
pub fn estimate_message_tokens(content: &str) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(content)
}
