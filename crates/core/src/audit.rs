//! Audit records for memory mutations.
//!
//! Every mutating store operation produces exactly one [`AuditLogEntry`].
//! Records are append-only and are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditOperation {
    /// A new fact was stored at version 1.
    Insert,
    /// A new version replaced `previous_id`.
    Supersede { previous_id: String, version: u32 },
    /// The entry was soft-deleted.
    Tombstone { reason: String },
    /// Trust score changed.
    AdjustTrust { previous: f32, current: f32 },
    /// The entry was flagged for re-verification.
    FlagStale,
}

impl AuditOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Supersede { .. } => "supersede",
            Self::Tombstone { .. } => "tombstone",
            Self::AdjustTrust { .. } => "adjust_trust",
            Self::FlagStale => "flag_stale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    pub entry_id: String,
    pub operation: AuditOperation,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Build a record; the log assigns `sequence` when it is appended.
    pub fn new(entry_id: impl Into<String>, operation: AuditOperation, actor: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            entry_id: entry_id.into(),
            operation,
            actor: actor.into(),
            timestamp: Utc::now(),
        }
    }
}
