//! Deterministic feature-hashing embedder.
//!
//! Needs no network and no model weights, so the engine works out of the
//! box and tests are reproducible. Each content token is hashed with
//! SHA-256 into one of `dimensions` buckets with a sign bit; the result is
//! L2-normalised so cosine similarity measures token overlap.

use advisor_core::error::ProviderError;
use advisor_core::provider::EmbeddingProvider;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "has",
    "have", "how", "i", "in", "is", "it", "its", "of", "on", "or", "our", "that", "the", "their",
    "this", "to", "was", "we", "were", "what", "when", "which", "who", "why", "will", "with",
    "you", "your",
];

pub struct HashEmbedder {
    model_id: String,
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(model_id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions: dimensions.max(1),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(bytes);
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

/// Lowercased alphanumeric tokens without stopwords; plural `s` is dropped.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| {
            if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                t[..t.len() - 1].to_string()
            } else {
                t
            }
        })
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
