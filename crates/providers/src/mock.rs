//! Scripted providers for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for the dev-dependencies of downstream crates.

use advisor_core::error::ProviderError;
use advisor_core::provider::{
    EmbeddingProvider, GenerativeProvider, ProviderRequest, ProviderResponse, Usage,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Create a simple text response.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A generator that plays back a script of results, one per call.
///
/// Once the script is exhausted every call fails with `NotConfigured`.
/// Every request is recorded so tests can inspect assembled prompts.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    call_count: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Successful text replies, in order.
    pub fn texts(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(text_response(r))).collect())
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    /// The system message of the n-th request.
    pub fn system_prompt(&self, n: usize) -> Option<String> {
        lock(&self.requests).get(n).and_then(|r| {
            r.messages
                .iter()
                .find(|m| m.role == advisor_core::conversation::Role::System)
                .map(|m| m.content.clone())
        })
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.script).pop_front().unwrap_or_else(|| {
            Err(ProviderError::NotConfigured(format!(
                "ScriptedGenerator: no more responses (call #{n})"
            )))
        })
    }
}

/// An embedder that returns fixed vectors for known texts and a default otherwise.
pub struct StaticEmbedder {
    model_id: String,
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl StaticEmbedder {
    pub fn new(model_id: &str, dimensions: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimensions,
            vectors: HashMap::new(),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    fn default_vector(&self) -> Vec<f32> {
        let mut v = vec![0.0; self.dimensions];
        if let Some(first) = v.first_mut() {
            *first = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    fn name(&self) -> &str {
        "static_mock"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts
            .iter()
            .map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| self.default_vector()))
            .collect())
    }
}

/// Wraps an embedder and fails the first `failures` calls with `error`.
pub struct FlakyEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    failures_left: AtomicU32,
    error: ProviderError,
    calls: AtomicU32,
}

impl FlakyEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, failures: u32, error: ProviderError) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            error,
            calls: AtomicU32::new(0),
        }
    }

    /// Fails every call.
    pub fn always_failing(inner: Arc<dyn EmbeddingProvider>, error: ProviderError) -> Self {
        Self::new(inner, u32::MAX, error)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn name(&self) -> &str {
        "flaky_mock"
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.error.clone());
        }
        self.inner.embed(texts).await
    }
}
