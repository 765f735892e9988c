//! Ingestion job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Committed,
    Failed,
}

/// One source document moving through the ingestion pipeline.
///
/// A job reaches `Committed` only after every chunk is stored; a `Failed`
/// job has no entries in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: String,
    pub source_ref: String,
    pub customer_id: String,
    pub project_id: String,
    pub status: JobStatus,
    pub chunk_count: usize,

    /// Entry ids created by this job, in chunk order. Empty unless committed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_ids: Vec<String>,

    /// Embedding batches requested for this job.
    #[serde(default)]
    pub embedding_batches: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    pub fn pending(
        source_ref: impl Into<String>,
        customer_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_ref: source_ref.into(),
            customer_id: customer_id.into(),
            project_id: project_id.into(),
            status: JobStatus::Pending,
            chunk_count: 0,
            entry_ids: Vec::new(),
            embedding_batches: 0,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn commit(&mut self, entry_ids: Vec<String>) {
        self.chunk_count = entry_ids.len();
        self.entry_ids = entry_ids;
        self.status = JobStatus::Committed;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.entry_ids.clear();
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}
