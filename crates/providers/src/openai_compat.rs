//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI and any
//! endpoint exposing `/v1/chat/completions` and `/v1/embeddings`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Batched embeddings with count and dimension checks
//! - Health checks

use advisor_core::conversation::Role;
use advisor_core::error::ProviderError;
use advisor_core::provider::*;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible chat provider.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_api_messages(messages: &[PromptMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn chat_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }
        body
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        accept_sse: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if accept_sse {
            builder = builder.header("Accept", "text/event-stream");
        }
        let response = builder.json(body).send().await.map_err(map_transport_error)?;
        check_status(response).await
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    match status {
        200 => Ok(response),
        429 => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        )),
        404 => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::ModelNotFound(body))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Provider returned error");
            Err(ProviderError::ApiError { status_code: status, message: body })
        }
    }
}

#[async_trait]
impl GenerativeProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");
        let response = self
            .post("chat/completions", &Self::chat_body(&request, false), false)
            .await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");
        let response = self
            .post("chat/completions", &Self::chat_body(&request, true), true)
            .await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer.drain(..=line_end);

                    match parse_sse_line(&line) {
                        SseEvent::Skip => {}
                        SseEvent::Done => {
                            let _ = tx.send(Ok(done_chunk(None))).await;
                            return;
                        }
                        SseEvent::Data(stream_resp) => {
                            if let Some(choice) = stream_resp.choices.first() {
                                let has_content =
                                    choice.delta.content.as_ref().is_some_and(|c| !c.is_empty());
                                if has_content {
                                    let chunk = StreamChunk {
                                        content: choice.delta.content.clone(),
                                        done: false,
                                        usage: None,
                                    };
                                    if tx.send(Ok(chunk)).await.is_err() {
                                        return; // receiver dropped
                                    }
                                }
                            }
                            if let Some(usage) = stream_resp.usage {
                                let _ = tx.send(Ok(done_chunk(Some(usage.into())))).await;
                                return;
                            }
                        }
                        SseEvent::Unparseable(e) => {
                            trace!(provider = %provider_name, error = %e, "Ignoring unparseable SSE chunk");
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(done_chunk(None))).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response.status().is_success())
    }
}

fn done_chunk(usage: Option<Usage>) -> StreamChunk {
    StreamChunk { content: None, done: true, usage }
}

enum SseEvent {
    Skip,
    Done,
    Data(StreamResponse),
    Unparseable(String),
}

fn parse_sse_line(line: &str) -> SseEvent {
    // Empty lines and SSE comments
    if line.is_empty() || line.starts_with(':') {
        return SseEvent::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => SseEvent::Data(resp),
        Err(e) => SseEvent::Unparseable(e.to_string()),
    }
}

/// An embedding provider on top of an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatEmbedder {
    http: OpenAiCompatProvider,
    model: String,
    dimensions: usize,
}

impl OpenAiCompatEmbedder {
    pub fn new(http: OpenAiCompatProvider, model: impl Into<String>, dimensions: usize) -> Self {
        Self { http, model: model.into(), dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatEmbedder {
    fn name(&self) -> &str {
        &self.http.name
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        debug!(provider = %self.http.name, model = %self.model, count = texts.len(), "Sending embedding request");

        let response = self.http.post("embeddings", &body, false).await?;
        let api_resp: EmbeddingApiResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse embedding response: {e}"))
        })?;
        collect_embeddings(api_resp, texts.len(), self.dimensions)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.http.health_check().await
    }
}

/// Order vectors by their reported index and check the shape.
fn collect_embeddings(
    mut resp: EmbeddingApiResponse,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if resp.data.len() != expected_count {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {expected_count} embeddings, got {}",
            resp.data.len()
        )));
    }
    resp.data.sort_by_key(|d| d.index);
    resp.data
        .into_iter()
        .map(|d| {
            if d.embedding.len() == dimensions {
                Ok(d.embedding)
            } else {
                Err(ProviderError::InvalidResponse(format!(
                    "embedding {} has {} dimensions, expected {dimensions}",
                    d.index,
                    d.embedding.len()
                )))
            }
        })
        .collect()
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", "http://localhost:1/v1/", "sk-test", Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(provider().base_url(), "http://localhost:1/v1");
    }

    #[test]
    fn debug_hides_key() {
        let debug = format!("{:?}", provider());
        assert!(!debug.contains("sk-test"));
    }

    #[test]
    fn message_conversion() {
        let messages = vec![PromptMessage::system("You are helpful"), PromptMessage::user("Hello")];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
    }

    #[test]
    fn chat_body_includes_options() {
        let mut req = ProviderRequest::new("gpt-4o-mini", vec![PromptMessage::user("hi")]);
        req.max_tokens = Some(256);
        let body = OpenAiCompatProvider::chat_body(&req, true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn parse_stream_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        match parse_sse_line(line) {
            SseEvent::Data(resp) => assert_eq!(resp.choices[0].delta.content.as_deref(), Some("Hello")),
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn parse_stream_control_lines() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseEvent::Done));
        assert!(matches!(parse_sse_line(": keep-alive"), SseEvent::Skip));
        assert!(matches!(parse_sse_line(""), SseEvent::Skip));
        assert!(matches!(parse_sse_line("data: {oops"), SseEvent::Unparseable(_)));
    }

    #[test]
    fn parse_stream_usage() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        match parse_sse_line(line) {
            SseEvent::Data(resp) => {
                let usage: Usage = resp.usage.unwrap().into();
                assert_eq!(usage.total_tokens, 15);
            }
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn embeddings_are_ordered_by_index() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5, 0.6], "index": 1},
                {"embedding": [0.1, 0.2, 0.3], "index": 0}
            ],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 8, "total_tokens": 8}
        }"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        let vectors = collect_embeddings(parsed, 2, 3).unwrap();
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn embedding_shape_is_checked() {
        let wrong_dims: EmbeddingApiResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.1,0.2],"index":0}]}"#).unwrap();
        assert!(matches!(
            collect_embeddings(wrong_dims, 1, 3),
            Err(ProviderError::InvalidResponse(_))
        ));

        let wrong_count: EmbeddingApiResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.1,0.2,0.3],"index":0}]}"#).unwrap();
        assert!(collect_embeddings(wrong_count, 2, 3).is_err());
    }
}
