//! Versioned in-memory store.
//!
//! Every version of every fact lives in one map keyed by entry id. The
//! current version of a fact is the end of its `superseded_by` chain. All
//! mutations take the write lock for their whole duration. Each one checks
//! its preconditions, appends its audit record, and only then changes the
//! state; a rejected audit write aborts the mutation with nothing changed.

use advisor_core::audit::{AuditLogEntry, AuditOperation};
use advisor_core::error::MemoryError;
use advisor_core::memory::{
    EmbeddingModel, ListFilters, MemoryEntry, MemoryStats, MemoryStore, MemoryUpdate,
    ScoredEntry, SearchFilters, StaleFlag, Tombstone,
};
use advisor_security::AuditLog;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::vector::rank_by_similarity;

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) entries: HashMap<String, MemoryEntry>,
    /// Insertion order of ids, for stable listing and snapshots.
    pub(crate) order: Vec<String>,
}

impl StoreState {
    pub(crate) fn push(&mut self, entry: MemoryEntry) {
        self.order.push(entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Id of the newest version in the chain containing `id`.
    fn head_id(&self, id: &str) -> Option<String> {
        let mut current = self.entries.get(id)?;
        let mut steps = 0;
        while let Some(next) = current.superseded_by.as_deref() {
            match self.entries.get(next) {
                Some(e) if steps <= self.entries.len() => {
                    current = e;
                    steps += 1;
                }
                _ => break,
            }
        }
        Some(current.id.clone())
    }

    fn head(&self, id: &str) -> Result<&MemoryEntry, MemoryError> {
        self.head_id(id)
            .and_then(|h| self.entries.get(&h))
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    fn head_mut(&mut self, id: &str) -> Result<&mut MemoryEntry, MemoryError> {
        let head = self
            .head_id(id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        self.entries
            .get_mut(&head)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }
}

/// The in-memory [`MemoryStore`].
pub struct InMemoryStore {
    model: EmbeddingModel,
    pub(crate) state: Arc<RwLock<StoreState>>,
    audit: Arc<AuditLog>,
}

impl InMemoryStore {
    pub fn new(model: EmbeddingModel) -> Self {
        Self::with_audit(model, Arc::new(AuditLog::new()))
    }

    pub fn with_audit(model: EmbeddingModel, audit: Arc<AuditLog>) -> Self {
        Self {
            model,
            state: Arc::new(RwLock::new(StoreState::default())),
            audit,
        }
    }

    /// The audit log this store appends to.
    pub fn audit(&self) -> Arc<AuditLog> {
        Arc::clone(&self.audit)
    }

    /// Check an entry against the store's embedding model.
    pub fn validate_embedding(&self, id: &str, model: &str, embedding: &[f32]) -> Result<(), MemoryError> {
        if model != self.model.id {
            return Err(MemoryError::ModelMismatch {
                id: id.to_string(),
                expected: self.model.id.clone(),
                actual: model.to_string(),
            });
        }
        if embedding.len() != self.model.dimensions {
            return Err(MemoryError::DimensionMismatch {
                id: id.to_string(),
                model: self.model.id.clone(),
                expected: self.model.dimensions,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(MemoryError::Corrupted {
                id: id.to_string(),
                reason: "embedding contains non-finite values".into(),
            });
        }
        Ok(())
    }

    /// Normalize a new entry to version 1 and validate it.
    fn prepare(&self, mut entry: MemoryEntry) -> Result<MemoryEntry, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        if entry.text.trim().is_empty() {
            return Err(MemoryError::Invalid("entry text is empty".into()));
        }
        self.validate_embedding(&entry.id, &entry.embedding_model, &entry.embedding)?;
        if !entry.trust_score.is_finite() {
            return Err(MemoryError::Invalid("trust score is not a number".into()));
        }
        entry.trust_score = entry.trust_score.clamp(0.0, 1.0);
        entry.version = 1;
        entry.supersedes = None;
        entry.superseded_by = None;
        entry.tombstone = None;
        entry.stale = None;
        entry.created_at = Utc::now();
        Ok(entry)
    }

    fn record(&self, entry_id: &str, operation: AuditOperation, actor: &str) -> Result<(), MemoryError> {
        self.audit
            .append(AuditLogEntry::new(entry_id, operation, actor))
            .map(|_| ())
            .map_err(audit_failed)
    }

    /// Current head of `id`, rejecting tombstoned facts.
    fn live_head(state: &StoreState, id: &str) -> Result<String, MemoryError> {
        let head = state.head(id)?;
        if head.is_tombstoned() {
            return Err(MemoryError::Tombstoned(head.id.clone()));
        }
        Ok(head.id.clone())
    }

    fn set_trust(
        &self,
        state: &mut StoreState,
        head_id: &str,
        current: f32,
        actor: &str,
    ) -> Result<f32, MemoryError> {
        let head = state.head_mut(head_id)?;
        let previous = head.trust_score;
        self.record(head_id, AuditOperation::AdjustTrust { previous, current }, actor)?;
        head.trust_score = current;
        debug!(entry_id = %head_id, previous, current, "Adjusted trust");
        Ok(current)
    }
}

fn audit_failed(e: advisor_security::AuditError) -> MemoryError {
    MemoryError::Storage(format!("audit record not written: {e}"))
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn embedding_model(&self) -> &EmbeddingModel {
        &self.model
    }

    async fn insert(&self, entry: MemoryEntry, actor: &str) -> Result<String, MemoryError> {
        let entry = self.prepare(entry)?;
        let mut state = self.state.write().await;
        if state.entries.contains_key(&entry.id) {
            return Err(MemoryError::Invalid(format!("duplicate entry id {}", entry.id)));
        }
        let id = entry.id.clone();
        self.record(&id, AuditOperation::Insert, actor)?;
        state.push(entry);
        debug!(entry_id = %id, "Inserted memory entry");
        Ok(id)
    }

    async fn insert_batch(
        &self,
        entries: Vec<MemoryEntry>,
        actor: &str,
    ) -> Result<Vec<String>, MemoryError> {
        let prepared = entries
            .into_iter()
            .map(|e| self.prepare(e))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.state.write().await;
        let mut seen = HashSet::new();
        for entry in &prepared {
            if state.entries.contains_key(&entry.id) || !seen.insert(entry.id.as_str()) {
                return Err(MemoryError::Invalid(format!("duplicate entry id {}", entry.id)));
            }
        }

        let ids: Vec<String> = prepared.iter().map(|e| e.id.clone()).collect();
        let records = ids
            .iter()
            .map(|id| AuditLogEntry::new(id, AuditOperation::Insert, actor))
            .collect();
        self.audit.append_all(records).map_err(audit_failed)?;
        for entry in prepared {
            state.push(entry);
        }
        info!(count = ids.len(), "Committed memory batch");
        Ok(ids)
    }

    async fn update(
        &self,
        id: &str,
        expected_version: u32,
        update: MemoryUpdate,
        actor: &str,
    ) -> Result<String, MemoryError> {
        let mut state = self.state.write().await;
        let head = state.head(id)?.clone();

        if head.is_tombstoned() {
            return Err(MemoryError::Tombstoned(head.id));
        }
        if head.version != expected_version {
            return Err(MemoryError::Conflict {
                id: head.id,
                expected: expected_version,
                actual: head.version,
            });
        }

        let text_changed = update.text.as_ref().is_some_and(|t| *t != head.text);
        let text = update.text.unwrap_or_else(|| head.text.clone());
        if text.trim().is_empty() {
            return Err(MemoryError::Invalid("entry text is empty".into()));
        }
        let embedding = match update.embedding {
            Some(embedding) => embedding,
            None if text_changed => {
                return Err(MemoryError::Invalid(
                    "changing the text requires a new embedding".into(),
                ));
            }
            None => head.embedding.clone(),
        };

        let new_id = Uuid::new_v4().to_string();
        self.validate_embedding(&new_id, &self.model.id, &embedding)?;

        let trust = match update.trust_score {
            Some(t) if t.is_finite() => t.clamp(0.0, 1.0),
            Some(_) => return Err(MemoryError::Invalid("trust score is not a number".into())),
            None => head.trust_score,
        };

        let next = MemoryEntry {
            id: new_id.clone(),
            text,
            embedding,
            embedding_model: self.model.id.clone(),
            metadata: update.metadata.unwrap_or_else(|| head.metadata.clone()),
            trust_score: trust,
            version: head.version + 1,
            supersedes: Some(head.id.clone()),
            superseded_by: None,
            tombstone: None,
            stale: None,
            created_at: Utc::now(),
        };
        let version = next.version;

        self.record(
            &new_id,
            AuditOperation::Supersede { previous_id: head.id.clone(), version },
            actor,
        )?;
        if let Some(prev) = state.entries.get_mut(&head.id) {
            prev.superseded_by = Some(new_id.clone());
        }
        state.push(next);
        info!(entry_id = %new_id, previous_id = %head.id, version, "Superseded memory entry");
        Ok(new_id)
    }

    async fn soft_delete(&self, id: &str, reason: &str, actor: &str) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        let head_id = Self::live_head(&state, id)?;
        self.record(&head_id, AuditOperation::Tombstone { reason: reason.to_string() }, actor)?;
        let head = state.head_mut(&head_id)?;
        head.tombstone = Some(Tombstone {
            reason: reason.to_string(),
            actor: actor.to_string(),
            at: Utc::now(),
        });
        info!(entry_id = %head_id, reason, "Tombstoned memory entry");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        if query.len() != self.model.dimensions {
            return Err(MemoryError::DimensionMismatch {
                id: "query".into(),
                model: self.model.id.clone(),
                expected: self.model.dimensions,
                actual: query.len(),
            });
        }
        let state = self.state.read().await;
        let candidates = state
            .entries
            .values()
            .filter(|e| e.is_current() && filters.matches(&e.metadata));
        let hits = rank_by_similarity(candidates, query, k);
        debug!(hits = hits.len(), k, "Memory search");
        Ok(hits)
    }

    async fn adjust_trust(&self, id: &str, delta: f32, actor: &str) -> Result<f32, MemoryError> {
        if !delta.is_finite() {
            return Err(MemoryError::Invalid("trust delta is not a number".into()));
        }
        let mut state = self.state.write().await;
        let head_id = Self::live_head(&state, id)?;
        let current = (state.head(&head_id)?.trust_score + delta).clamp(0.0, 1.0);
        self.set_trust(&mut state, &head_id, current, actor)
    }

    async fn reinforce_trust(&self, id: &str, step: f32, actor: &str) -> Result<MemoryEntry, MemoryError> {
        if !step.is_finite() {
            return Err(MemoryError::Invalid("trust step is not a number".into()));
        }
        let mut state = self.state.write().await;
        let head_id = Self::live_head(&state, id)?;
        let previous = state.head(&head_id)?.trust_score;
        let current = (previous + step.clamp(0.0, 1.0) * (1.0 - previous)).clamp(0.0, 1.0);
        self.set_trust(&mut state, &head_id, current, actor)?;
        Ok(state.head(&head_id)?.clone())
    }

    async fn flag_stale(&self, id: &str, actor: &str) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        let head_id = Self::live_head(&state, id)?;
        self.record(&head_id, AuditOperation::FlagStale, actor)?;
        let head = state.head_mut(&head_id)?;
        head.stale = Some(StaleFlag {
            reported_by: actor.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        Ok(self.state.read().await.entries.get(id).cloned())
    }

    async fn resolve(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let state = self.state.read().await;
        Ok(state.head_id(id).and_then(|h| state.entries.get(&h)).cloned())
    }

    async fn history(&self, id: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let state = self.state.read().await;
        let Some(start) = state.entries.get(id) else {
            return Ok(Vec::new());
        };

        // Walk back to the first version, then forward to the head.
        let mut root = start;
        let mut steps = 0;
        while let Some(prev) = root.supersedes.as_deref().and_then(|p| state.entries.get(p)) {
            if steps > state.entries.len() {
                break;
            }
            root = prev;
            steps += 1;
        }

        let mut chain = vec![root.clone()];
        let mut current = root;
        while let Some(next) = current.superseded_by.as_deref().and_then(|n| state.entries.get(n)) {
            if chain.len() > state.entries.len() {
                break;
            }
            chain.push(next.clone());
            current = next;
        }
        Ok(chain)
    }

    async fn list(&self, filters: &ListFilters) -> Result<Vec<MemoryEntry>, MemoryError> {
        let state = self.state.read().await;
        let mut matching: Vec<&MemoryEntry> = state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .filter(|e| filters.include_history || e.superseded_by.is_none())
            .filter(|e| filters.include_tombstoned || !e.is_tombstoned())
            .filter(|e| !filters.stale_only || e.stale.is_some())
            .filter(|e| filters.filters.matches(&e.metadata))
            .collect();

        // Newest first; insertion order breaks ties.
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(filters.offset)
            .take(filters.limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let state = self.state.read().await;
        let mut stats = MemoryStats {
            total_versions: state.entries.len(),
            audit_records: self.audit.count(),
            ..MemoryStats::default()
        };
        for entry in state.entries.values() {
            if entry.superseded_by.is_some() {
                stats.superseded += 1;
            }
            if entry.is_tombstoned() {
                stats.tombstoned += 1;
            }
            if entry.is_current() {
                stats.current += 1;
                *stats
                    .per_customer
                    .entry(entry.metadata.customer_id.clone())
                    .or_default() += 1;
                if entry.stale.is_some() {
                    stats.stale += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn audit_entries(&self) -> Result<Vec<AuditLogEntry>, MemoryError> {
        Ok(self.audit.entries())
    }
}
