//! Memory trait: versioned knowledge storage with similarity search.
//!
//! A memory entry is an immutable snapshot of a fact. Changing the text of a
//! fact produces a new entry (new id, version + 1) and links the old one to it
//! through `superseded_by`. Deleting a fact tombstones it. Only curation
//! annotations (trust score, stale flag) change on an existing snapshot, and
//! each such change is recorded in the audit log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::audit::AuditLogEntry;
use crate::error::MemoryError;

/// Persona tag that grants access to every entry.
pub const ANY_SCOPE: &str = "*";

/// Where a memory entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Email,
    Slack,
    Document,
    MeetingNotes,
    Conversation,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Document => "document",
            Self::MeetingNotes => "meeting_notes",
            Self::Conversation => "conversation",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "slack" => Ok(Self::Slack),
            "document" | "doc" => Ok(Self::Document),
            "meeting_notes" | "meeting" => Ok(Self::MeetingNotes),
            "conversation" => Ok(Self::Conversation),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata attached to every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub customer_id: String,
    pub project_id: String,

    /// When the underlying fact was observed (not when it was stored).
    pub timestamp: DateTime<Utc>,

    pub source_type: SourceType,

    /// Persona scopes allowed to see this entry. Empty = visible to all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persona_tags: Vec<String>,

    /// Originating document or conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,

    /// Position of this chunk within its source document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,

    /// Byte range `[start, end)` of this chunk in the normalized source text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_span: Option<(usize, usize)>,

    /// Free-form extra attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl MemoryMetadata {
    pub fn new(
        customer_id: impl Into<String>,
        project_id: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            project_id: project_id.into(),
            timestamp: Utc::now(),
            source_type,
            persona_tags: Vec::new(),
            source_ref: None,
            chunk_index: None,
            chunk_span: None,
            extra: BTreeMap::new(),
        }
    }

    /// Whether a persona restricted to `scopes` may see this entry.
    pub fn visible_to(&self, scopes: &[String]) -> bool {
        if self.persona_tags.is_empty() || scopes.iter().any(|s| s == ANY_SCOPE) {
            return true;
        }
        self.persona_tags.iter().any(|t| scopes.contains(t))
    }
}

/// Why and when an entry was tombstoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub reason: String,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// Marks an entry as awaiting re-verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleFlag {
    pub reported_by: String,
    pub at: DateTime<Utc>,
}

/// A single versioned memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique, immutable id of this version.
    pub id: String,

    pub text: String,

    pub embedding: Vec<f32>,

    /// Identifier of the embedding model that produced `embedding`.
    pub embedding_model: String,

    pub metadata: MemoryMetadata,

    /// Confidence weight in [0, 1].
    pub trust_score: f32,

    /// 1 for a new fact, incremented by every update.
    pub version: u32,

    /// Previous version, if this entry replaced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,

    /// Newer version, if this entry was replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<Tombstone>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<StaleFlag>,

    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// Build a version-1 entry. The store assigns an id when `id` is empty.
    pub fn new(
        text: impl Into<String>,
        embedding: Vec<f32>,
        embedding_model: impl Into<String>,
        metadata: MemoryMetadata,
        trust_score: f32,
    ) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            embedding,
            embedding_model: embedding_model.into(),
            metadata,
            trust_score: trust_score.clamp(0.0, 1.0),
            version: 1,
            supersedes: None,
            superseded_by: None,
            tombstone: None,
            stale: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstone.is_some()
    }

    /// Current = neither superseded nor tombstoned.
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none() && self.tombstone.is_none()
    }
}

/// Filters applied by `search` and `list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Persona scopes of the caller. Empty = no persona restriction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persona_scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_types: Vec<SourceType>,
}

impl SearchFilters {
    pub fn for_customer(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: Some(customer_id.into()),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.persona_scopes = scopes;
        self
    }

    /// Metadata-only match; tombstone/supersession state is the store's concern.
    pub fn matches(&self, meta: &MemoryMetadata) -> bool {
        if let Some(c) = &self.customer_id {
            if &meta.customer_id != c {
                return false;
            }
        }
        if let Some(p) = &self.project_id {
            if &meta.project_id != p {
                return false;
            }
        }
        if !self.persona_scopes.is_empty() && !meta.visible_to(&self.persona_scopes) {
            return false;
        }
        if let Some(from) = self.from {
            if meta.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if meta.timestamp > to {
                return false;
            }
        }
        self.source_types.is_empty() || self.source_types.contains(&meta.source_type)
    }
}

/// Options for listing entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilters {
    #[serde(flatten)]
    pub filters: SearchFilters,

    #[serde(default = "default_list_limit")]
    pub limit: usize,

    #[serde(default)]
    pub offset: usize,

    /// Include superseded versions.
    #[serde(default)]
    pub include_history: bool,

    #[serde(default)]
    pub include_tombstoned: bool,

    /// Only entries flagged for re-verification.
    #[serde(default)]
    pub stale_only: bool,
}

fn default_list_limit() -> usize {
    100
}

impl Default for ListFilters {
    fn default() -> Self {
        Self {
            filters: SearchFilters::default(),
            limit: default_list_limit(),
            offset: 0,
            include_history: false,
            include_tombstoned: false,
            stale_only: false,
        }
    }
}

/// A search hit: the entry plus its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

/// Fields that may change when a new version is written.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub text: Option<String>,
    /// Required when `text` changes; must come from the store's model.
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<MemoryMetadata>,
    /// Trust for the new version. Defaults to the previous version's trust.
    pub trust_score: Option<f32>,
}

/// The embedding space a store is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub id: String,
    pub dimensions: usize,
}

impl EmbeddingModel {
    pub fn new(id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            id: id.into(),
            dimensions,
        }
    }
}

/// Aggregate counts for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_versions: usize,
    pub current: usize,
    pub superseded: usize,
    pub tombstoned: usize,
    pub stale: usize,
    pub per_customer: BTreeMap<String, usize>,
    pub audit_records: usize,
}

/// The versioned memory store.
///
/// `actor` identifies who performed a mutation; it lands in the audit log.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// The embedding model every entry must match.
    fn embedding_model(&self) -> &EmbeddingModel;

    /// Insert a version-1 entry.
    async fn insert(&self, entry: MemoryEntry, actor: &str) -> Result<String, MemoryError>;

    /// Insert several entries; either all become visible or none do.
    async fn insert_batch(
        &self,
        entries: Vec<MemoryEntry>,
        actor: &str,
    ) -> Result<Vec<String>, MemoryError>;

    /// Write a new version of the fact `id` belongs to.
    ///
    /// `expected_version` is the version the caller last read; any other
    /// current version yields `MemoryError::Conflict`.
    async fn update(
        &self,
        id: &str,
        expected_version: u32,
        update: MemoryUpdate,
        actor: &str,
    ) -> Result<String, MemoryError>;

    /// Tombstone the current version of the fact `id` belongs to.
    async fn soft_delete(&self, id: &str, reason: &str, actor: &str) -> Result<(), MemoryError>;

    /// Similarity search over current, non-tombstoned entries.
    async fn search(
        &self,
        query: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredEntry>, MemoryError>;

    /// Add `delta` to the trust score, clamped to [0, 1]. Returns the new score.
    async fn adjust_trust(&self, id: &str, delta: f32, actor: &str) -> Result<f32, MemoryError>;

    /// Move the head's trust a fraction `step` of the way toward 1, reading
    /// and writing it as one operation. Returns the updated head.
    async fn reinforce_trust(&self, id: &str, step: f32, actor: &str) -> Result<MemoryEntry, MemoryError>;

    /// Flag the entry for re-verification.
    async fn flag_stale(&self, id: &str, actor: &str) -> Result<(), MemoryError>;

    /// Fetch an exact version by id.
    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError>;

    /// Follow supersession links from `id` to the newest version.
    async fn resolve(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError>;

    /// All versions of the fact `id` belongs to, oldest first.
    async fn history(&self, id: &str) -> Result<Vec<MemoryEntry>, MemoryError>;

    async fn list(&self, filters: &ListFilters) -> Result<Vec<MemoryEntry>, MemoryError>;

    async fn stats(&self) -> Result<MemoryStats, MemoryError>;

    /// Every audit record, in commit order.
    async fn audit_entries(&self) -> Result<Vec<AuditLogEntry>, MemoryError>;
}
