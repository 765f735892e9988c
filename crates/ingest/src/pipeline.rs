//! The ingestion pipeline.
//!
//! `ingest` turns one source document into committed memory entries:
//!
//! 1. validate customer/project ids against the known scopes
//! 2. normalize and reject empty text
//! 3. run the privacy filter
//! 4. chunk, then embed the chunks in batches
//! 5. commit every chunk with a single `insert_batch`
//!
//! Chunk text is stored exactly as cut, with its byte span, so the stored
//! entries of one document stitch back into its normalized text.
//!
//! Steps 1–3 reject synchronously with no job recorded. From step 4 on a
//! job exists; it ends `Committed` with all chunks stored or `Failed` with
//! none.

use advisor_config::IngestionConfig;
use advisor_core::error::{Error, IngestError, ProviderError};
use advisor_core::event::{DomainEvent, EventBus};
use advisor_core::ingestion::IngestionJob;
use advisor_core::memory::{MemoryEntry, MemoryMetadata, MemoryStore, SourceType};
use advisor_core::provider::EmbeddingProvider;
use advisor_core::scope::KnownScopes;
use advisor_security::PrivacyFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::chunker::{ChunkPolicy, chunk};
use crate::normalize::normalize;

/// A source document handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    pub customer_id: String,
    pub project_id: String,
    pub source_type: SourceType,

    /// Where the document came from (file name, message id). Defaults to the job id.
    #[serde(default)]
    pub source_ref: Option<String>,

    #[serde(default)]
    pub persona_tags: Vec<String>,

    /// When the content was observed. Defaults to now.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IngestRequest {
    pub fn new(
        text: impl Into<String>,
        customer_id: impl Into<String>,
        project_id: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            text: text.into(),
            customer_id: customer_id.into(),
            project_id: project_id.into(),
            source_type,
            source_ref: None,
            persona_tags: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }

    pub fn with_persona_tags(mut self, tags: Vec<String>) -> Self {
        self.persona_tags = tags;
        self
    }
}

/// A single fact added directly, without chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub text: String,
    pub customer_id: String,
    pub project_id: String,

    #[serde(default = "default_manual_source")]
    pub source_type: SourceType,

    #[serde(default)]
    pub persona_tags: Vec<String>,

    /// Initial trust. Defaults to the configured manual trust.
    #[serde(default)]
    pub trust_score: Option<f32>,

    #[serde(default)]
    pub source_ref: Option<String>,
}

fn default_manual_source() -> SourceType {
    SourceType::Manual
}

impl NewMemory {
    pub fn new(
        text: impl Into<String>,
        customer_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            customer_id: customer_id.into(),
            project_id: project_id.into(),
            source_type: SourceType::Manual,
            persona_tags: Vec::new(),
            trust_score: None,
            source_ref: None,
        }
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    privacy: Arc<PrivacyFilter>,
    scopes: KnownScopes,
    policy: ChunkPolicy,
    batch_size: usize,
    ingested_trust: f32,
    manual_trust: f32,
    jobs: RwLock<Vec<IngestionJob>>,
    events: Option<Arc<EventBus>>,
}

impl IngestionPipeline {
    /// A pipeline with built-in privacy detectors and an open scope directory.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &IngestionConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            privacy: Arc::new(PrivacyFilter::builtin()),
            scopes: KnownScopes::open(),
            policy: ChunkPolicy::new(config.chunk_size, config.chunk_overlap),
            batch_size: config.batch_size.max(1),
            ingested_trust: config.ingested_trust,
            manual_trust: config.manual_trust,
            jobs: RwLock::new(Vec::new()),
            events: None,
        }
    }

    pub fn with_privacy(mut self, privacy: Arc<PrivacyFilter>) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_scopes(mut self, scopes: KnownScopes) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        self.policy
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Ingest one document. See the module docs for the steps.
    pub async fn ingest(&self, request: IngestRequest, actor: &str) -> Result<IngestionJob, Error> {
        self.scopes.validate(&request.customer_id, &request.project_id)?;
        let text = normalize(&request.text);
        if text.is_empty() {
            return Err(IngestError::EmptyDocument.into());
        }
        if let Err(e) = self.privacy.check(&text) {
            warn!(customer_id = %request.customer_id, error = %e, "Document rejected by privacy filter");
            return Err(e.into());
        }

        let mut job = IngestionJob::pending(
            request.source_ref.clone().unwrap_or_default(),
            &request.customer_id,
            &request.project_id,
        );
        if job.source_ref.is_empty() {
            job.source_ref = job.id.clone();
        }
        self.jobs.write().await.push(job.clone());

        let chunks = chunk(&text, &self.policy);
        debug!(job_id = %job.id, chunks = chunks.len(), "Document chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            job.embedding_batches += 1;
            match self.embedder.embed(batch).await {
                Ok(mut v) if v.len() == batch.len() => vectors.append(&mut v),
                Ok(v) => {
                    let source = ProviderError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        v.len()
                    ));
                    let error = IngestError::EmbeddingFailed { job_id: job.id.clone(), source };
                    return Err(self.fail(job, error).await);
                }
                Err(source) => {
                    let error = IngestError::EmbeddingFailed { job_id: job.id.clone(), source };
                    return Err(self.fail(job, error).await);
                }
            }
        }

        let observed = request.timestamp.unwrap_or_else(Utc::now);
        let model = self.embedder.model_id().to_string();
        let entries: Vec<MemoryEntry> = chunks
            .iter()
            .zip(texts)
            .zip(vectors)
            .map(|((c, text), embedding)| {
                let mut metadata = MemoryMetadata::new(
                    &request.customer_id,
                    &request.project_id,
                    request.source_type,
                );
                metadata.timestamp = observed;
                metadata.persona_tags = request.persona_tags.clone();
                metadata.source_ref = Some(job.source_ref.clone());
                metadata.chunk_index = Some(c.index);
                metadata.chunk_span = Some((c.start, c.end));
                MemoryEntry::new(text, embedding, model.clone(), metadata, self.ingested_trust)
            })
            .collect();

        let ids = match self.store.insert_batch(entries, actor).await {
            Ok(ids) => ids,
            Err(source) => {
                let error = IngestError::CommitFailed { job_id: job.id.clone(), source };
                return Err(self.fail(job, error).await);
            }
        };

        job.commit(ids);
        self.record(&job).await;
        info!(job_id = %job.id, source_ref = %job.source_ref, chunks = job.chunk_count, "Document ingested");
        self.publish(DomainEvent::DocumentIngested {
            job_id: job.id.clone(),
            source_ref: job.source_ref.clone(),
            chunk_count: job.chunk_count,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    /// Mark the job failed and build the error to return.
    async fn fail(&self, mut job: IngestionJob, error: IngestError) -> Error {
        job.fail(error.to_string());
        self.record(&job).await;
        warn!(job_id = %job.id, error = %error, "Ingestion failed, nothing committed");
        self.publish(DomainEvent::IngestionFailed {
            job_id: job.id.clone(),
            reason: error.to_string(),
            timestamp: Utc::now(),
        });
        error.into()
    }

    async fn record(&self, job: &IngestionJob) {
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = job.clone(),
            None => jobs.push(job.clone()),
        }
    }

    /// Add one fact as a single version-1 entry.
    ///
    /// The text is stored exactly as given; only all-whitespace text is rejected.
    pub async fn add_memory(&self, memory: NewMemory, actor: &str) -> Result<MemoryEntry, Error> {
        self.scopes.validate(&memory.customer_id, &memory.project_id)?;
        if memory.text.trim().is_empty() {
            return Err(IngestError::EmptyDocument.into());
        }
        self.privacy.check(&memory.text)?;

        let mut vectors = self.embedder.embed(std::slice::from_ref(&memory.text)).await?;
        let embedding = vectors
            .pop()
            .ok_or_else(|| Error::Internal("embedding provider returned no vector".into()))?;

        let mut metadata = MemoryMetadata::new(&memory.customer_id, &memory.project_id, memory.source_type);
        metadata.persona_tags = memory.persona_tags;
        metadata.source_ref = memory.source_ref;
        let entry = MemoryEntry::new(
            memory.text,
            embedding,
            self.embedder.model_id(),
            metadata,
            memory.trust_score.unwrap_or(self.manual_trust),
        );

        let id = self.store.insert(entry, actor).await?;
        let stored = self
            .store
            .get(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("memory entry {id}")))?;
        info!(entry_id = %id, customer_id = %stored.metadata.customer_id, "Memory added");
        self.publish(DomainEvent::MemoryMutated {
            entry_id: id,
            operation: "add".into(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
        });
        Ok(stored)
    }

    pub async fn job(&self, id: &str) -> Option<IngestionJob> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// All jobs, oldest first.
    pub async fn jobs(&self) -> Vec<IngestionJob> {
        self.jobs.read().await.clone()
    }
}
