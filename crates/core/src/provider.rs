//! Provider traits: the abstraction over model backends.
//!
//! Two external collaborators sit behind these traits: the embedding
//! provider (text → fixed-dimension vector) and the generative provider
//! (prompt → text, optionally streamed). The engine never knows which
//! backend it is talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::Role;
use crate::error::ProviderError;
use crate::memory::EmbeddingModel;

/// One message in an assembled prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini", "llama3.1:8b")
    pub model: String,

    pub messages: Vec<PromptMessage>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<PromptMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            stream: false,
            stop: Vec::new(),
        }
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,

    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk of a streamed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The generative model provider.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Stream a response.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// The embedding provider. Every vector it returns has `dimensions()` entries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Identifier stored alongside every embedding this provider produces.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    fn model(&self) -> EmbeddingModel {
        EmbeddingModel::new(self.model_id(), self.dimensions())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Drain a stream into a single string.
pub async fn collect_stream(
    mut rx: tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>,
) -> Result<(String, Option<Usage>), ProviderError> {
    let mut content = String::new();
    let mut usage = None;
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        if let Some(delta) = chunk.content {
            content.push_str(&delta);
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
        if chunk.done {
            break;
        }
    }
    Ok((content, usage))
}
