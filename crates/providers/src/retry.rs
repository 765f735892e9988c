//! Bounded retry with exponential backoff and a per-attempt timeout.
//!
//! Every call to an external model goes through a [`RetryPolicy`]. Each
//! attempt is raced against the policy's timeout. Transient failures
//! (timeouts, rate limits, network errors, 5xx) are retried on a
//! `tokio_retry` exponential schedule capped at `max_backoff`; permanent
//! failures are returned immediately. When the budget runs out the caller
//! sees [`ProviderError::RetriesExhausted`] wrapping the last error.

use advisor_config::RetryConfig;
use advisor_core::error::ProviderError;
use advisor_core::provider::{
    EmbeddingProvider, GenerativeProvider, ProviderRequest, ProviderResponse, StreamChunk,
};
use async_trait::async_trait;
use std::future::Future;
use std::iter::Take;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Growth per retry, rounded to a whole number.
    pub multiplier: f64,
    /// Limit for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), 30)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, timeout_secs: u64) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier.max(1.0),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// One attempt, no retries.
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            timeout,
        }
    }

    /// The unbounded delay schedule: `initial_backoff * multiplier^n`, capped.
    fn schedule(&self) -> ExponentialBackoff {
        let base = self.multiplier.round().max(1.0) as u64;
        let initial = self.initial_backoff.as_millis().min(u64::MAX as u128) as u64;
        ExponentialBackoff::from_millis(base)
            .factor(initial / base)
            .max_delay(self.max_backoff)
    }

    /// Delays between attempts, one per allowed retry.
    pub fn strategy(&self) -> Take<ExponentialBackoff> {
        self.schedule().take(self.max_retries as usize)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.schedule().nth(attempt as usize).unwrap_or(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails permanently, or the budget is spent.
    /// Returns the value and the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<(T, u32), ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self.timeout;
        let max_backoff = self.max_backoff;
        let mut attempts: u32 = 0;

        let action = || {
            attempts += 1;
            let attempt = call();
            async move {
                let error = match tokio::time::timeout(timeout, attempt).await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(e)) => e,
                    Err(_) => ProviderError::Timeout(format!(
                        "{operation} exceeded {}ms",
                        timeout.as_millis()
                    )),
                };
                // Wait out the server's hint, up to the cap, before the scheduled delay.
                if let ProviderError::RateLimited { retry_after_secs } = &error {
                    tokio::time::sleep(Duration::from_secs(*retry_after_secs).min(max_backoff)).await;
                }
                Err(error)
            }
        };
        let transient = |error: &ProviderError| {
            let transient = error.is_transient();
            if transient {
                warn!(operation, error = %error, "Transient provider failure");
            }
            transient
        };

        let outcome = RetryIf::spawn(self.strategy(), action, transient).await;
        match outcome {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Succeeded after retry");
                }
                Ok((value, attempts))
            }
            Err(error) if error.is_transient() => {
                warn!(operation, attempts, error = %error, "Retry budget exhausted");
                Err(ProviderError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last: Box::new(error),
                })
            }
            Err(error) => Err(error),
        }
    }
}

/// An embedding provider whose calls are retried under a policy.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl EmbeddingProvider for RetryingEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let (vectors, _) = self.policy.run("embed", || self.inner.embed(texts)).await?;
        Ok(vectors)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

/// A generative provider whose calls are retried under a policy.
///
/// For streaming only establishing the stream is retried; a stream that
/// breaks midway surfaces the error to the consumer.
pub struct RetryingGenerator {
    inner: Arc<dyn GenerativeProvider>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn GenerativeProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl GenerativeProvider for RetryingGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let (response, _) = self
            .policy
            .run("generate", || self.inner.complete(request.clone()))
            .await?;
        Ok(response)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        let (rx, _) = self
            .policy
            .run("generate_stream", || self.inner.stream(request.clone()))
            .await?;
        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
