//! Feedback and curation for Advisor memory.
//!
//! Besides ingestion, the [`CurationController`] is the only writer of
//! memory content. Users confirm, correct, delete or flag entries here;
//! every call lands in the store's audit log and on the event bus.

use advisor_config::CurationConfig;
use advisor_core::error::{Error, IngestError};
use advisor_core::event::{DomainEvent, EventBus};
use advisor_core::memory::{MemoryStore, MemoryUpdate};
use advisor_core::provider::EmbeddingProvider;
use advisor_security::PrivacyFilter;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct CurationController {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    privacy: Arc<PrivacyFilter>,
    config: CurationConfig,
    events: Option<Arc<EventBus>>,
}

impl CurationController {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: CurationConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            privacy: Arc::new(PrivacyFilter::builtin()),
            config,
            events: None,
        }
    }

    pub fn with_privacy(mut self, privacy: Arc<PrivacyFilter>) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, entry_id: &str, operation: &str, actor: &str) {
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::MemoryMutated {
                entry_id: entry_id.to_string(),
                operation: operation.to_string(),
                actor: actor.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Raise trust toward 1: `trust += confirm_step * (1 - trust)`.
    /// Returns the new trust score.
    pub async fn confirm_entry(&self, id: &str, actor: &str) -> Result<f32, Error> {
        let head = self.store.reinforce_trust(id, self.config.confirm_step, actor).await?;
        info!(entry_id = %head.id, trust = head.trust_score, "Entry confirmed");
        self.publish(&head.id, "confirm", actor);
        Ok(head.trust_score)
    }

    /// Write a corrected version. The text is re-embedded and trust resets
    /// to neutral until someone confirms it again. Returns the new version's id.
    ///
    /// `expected_version` is the version the caller read; a newer head
    /// yields a conflict and nothing is written.
    pub async fn correct_entry(
        &self,
        id: &str,
        expected_version: u32,
        new_text: &str,
        actor: &str,
    ) -> Result<String, Error> {
        if new_text.trim().is_empty() {
            return Err(IngestError::EmptyDocument.into());
        }
        self.privacy.check(new_text)?;

        let embedding = self
            .embedder
            .embed(&[new_text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Internal("embedding provider returned no vector".into()))?;

        let update = MemoryUpdate {
            text: Some(new_text.to_string()),
            embedding: Some(embedding),
            metadata: None,
            trust_score: Some(self.config.neutral_trust),
        };
        let new_id = self.store.update(id, expected_version, update, actor).await?;
        info!(entry_id = %id, new_entry_id = %new_id, "Entry corrected");
        self.publish(&new_id, "correct", actor);
        Ok(new_id)
    }

    /// Tombstone the entry. The reason is kept in the audit log.
    pub async fn delete_entry(&self, id: &str, reason: &str, actor: &str) -> Result<(), Error> {
        if reason.trim().is_empty() {
            return Err(Error::Validation("a deletion reason is required".into()));
        }
        self.store.soft_delete(id, reason, actor).await?;
        info!(entry_id = %id, reason, "Entry deleted");
        self.publish(id, "delete", actor);
        Ok(())
    }

    /// Flag the entry for re-verification. Trust is left unchanged.
    pub async fn report_stale(&self, id: &str, actor: &str) -> Result<(), Error> {
        self.store.flag_stale(id, actor).await?;
        info!(entry_id = %id, "Entry reported stale");
        self.publish(id, "report_stale", actor);
        Ok(())
    }
}
