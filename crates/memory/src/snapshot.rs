//! JSONL snapshot persistence for [`InMemoryStore`].
//!
//! One entry version per line, in insertion order. Lines that fail to parse
//! or that do not match the store's embedding model are reported and skipped;
//! the rest of the snapshot still loads. A version whose successor was
//! skipped becomes current again, so the fact stays searchable.

use advisor_core::error::MemoryError;
use advisor_core::memory::{EmbeddingModel, MemoryEntry};
use advisor_security::AuditLog;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{InMemoryStore, StoreState};

/// Outcome of loading a snapshot.
#[derive(Debug, Default)]
pub struct SnapshotReport {
    pub loaded: usize,
    /// (line number, problem) for every skipped line.
    pub skipped: Vec<(usize, MemoryError)>,
    /// Versions whose `superseded_by` pointed at a missing entry and were
    /// made current again.
    pub relinked: Vec<String>,
}

impl InMemoryStore {
    /// Write every version to `path`. The file is replaced atomically.
    pub async fn save_snapshot(&self, path: &Path) -> Result<usize, MemoryError> {
        let state = self.state.read().await;

        let mut content = String::new();
        for entry in state.order.iter().filter_map(|id| state.entries.get(id)) {
            let line = serde_json::to_string(entry).map_err(|e| {
                MemoryError::Storage(format!("Failed to serialize memory entry: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }
        let count = state.order.len();
        drop(state);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MemoryError::Storage(format!("Failed to create memory directory: {e}"))
                })?;
            }
        }
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, &content)
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| MemoryError::Storage(format!("Failed to replace memory file: {e}")))?;

        debug!(path = %path.display(), count, "Saved memory snapshot");
        Ok(count)
    }

    /// Build a store from a snapshot. A missing file yields an empty store.
    pub async fn load_snapshot(
        path: &Path,
        model: EmbeddingModel,
        audit: Arc<AuditLog>,
    ) -> Result<(Self, SnapshotReport), MemoryError> {
        let store = Self::with_audit(model, audit);
        let mut report = SnapshotReport::default();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((store, report)),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read memory file {}: {e}",
                    path.display()
                )));
            }
        };

        let mut state = StoreState::default();
        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            if line.trim().is_empty() {
                continue;
            }
            let entry = match serde_json::from_str::<MemoryEntry>(line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping corrupted memory entry");
                    report.skipped.push((
                        line_no,
                        MemoryError::Corrupted {
                            id: format!("line {line_no}"),
                            reason: e.to_string(),
                        },
                    ));
                    continue;
                }
            };
            if let Err(e) = store.validate_embedding(&entry.id, &entry.embedding_model, &entry.embedding) {
                warn!(line = line_no, entry_id = %entry.id, error = %e, "Skipping incompatible memory entry");
                report.skipped.push((line_no, e));
                continue;
            }
            if state.entries.contains_key(&entry.id) {
                report.skipped.push((
                    line_no,
                    MemoryError::Corrupted {
                        id: entry.id.clone(),
                        reason: "duplicate entry id".into(),
                    },
                ));
                continue;
            }
            state.push(entry);
            report.loaded += 1;
        }

        let dangling: Vec<String> = state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .filter(|e| e.superseded_by.as_ref().is_some_and(|next| !state.entries.contains_key(next)))
            .map(|e| e.id.clone())
            .collect();
        for id in dangling {
            if let Some(entry) = state.entries.get_mut(&id) {
                let missing = entry.superseded_by.take().unwrap_or_default();
                warn!(entry_id = %id, missing = %missing, "Successor version missing, entry is current again");
            }
            report.relinked.push(id);
        }

        *store.state.write().await = state;
        debug!(path = %path.display(), loaded = report.loaded, skipped = report.skipped.len(), "Loaded memory snapshot");
        Ok((store, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisor_core::memory::{MemoryMetadata, MemoryStore, MemoryUpdate, SearchFilters, SourceType};

    fn model() -> EmbeddingModel {
        EmbeddingModel::new("test-model", 2)
    }

    fn entry(text: &str, embedding: Vec<f32>) -> MemoryEntry {
        MemoryEntry::new(
            text,
            embedding,
            "test-model",
            MemoryMetadata::new("acme", "p1", SourceType::Slack),
            0.5,
        )
    }

    #[tokio::test]
    async fn save_and_load_preserves_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.jsonl");

        let store = InMemoryStore::new(model());
        let id = store.insert(entry("v1", vec![1.0, 0.0]), "a").await.unwrap();
        let new_id = store
            .update(
                &id,
                1,
                MemoryUpdate {
                    text: Some("v2".into()),
                    embedding: Some(vec![0.0, 1.0]),
                    ..Default::default()
                },
                "a",
            )
            .await
            .unwrap();
        let gone = store.insert(entry("gone", vec![1.0, 1.0]), "a").await.unwrap();
        store.soft_delete(&gone, "privacy", "a").await.unwrap();

        assert_eq!(store.save_snapshot(&path).await.unwrap(), 3);

        let (loaded, report) = InMemoryStore::load_snapshot(&path, model(), Arc::new(AuditLog::new()))
            .await
            .unwrap();
        assert_eq!(report.loaded, 3);
        assert!(report.skipped.is_empty());
        assert_eq!(loaded.resolve(&id).await.unwrap().unwrap().id, new_id);

        let hits = loaded.search(&[1.0, 1.0], &SearchFilters::default(), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.text, "v2");
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.jsonl");

        let mut good = entry("good", vec![1.0, 0.0]);
        good.id = "good".into();
        let mut wrong_dims = entry("bad", vec![1.0, 0.0, 0.0]);
        wrong_dims.id = "bad".into();
        let content = format!(
            "{}\n{{not json\n{}\n",
            serde_json::to_string(&good).unwrap(),
            serde_json::to_string(&wrong_dims).unwrap()
        );
        std::fs::write(&path, content).unwrap();

        let (store, report) = InMemoryStore::load_snapshot(&path, model(), Arc::new(AuditLog::new()))
            .await
            .unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].0, 2);
        assert!(matches!(report.skipped[1].1, MemoryError::DimensionMismatch { .. }));
        assert!(store.get("good").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lost_successor_makes_previous_version_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.jsonl");

        let store = InMemoryStore::new(model());
        let id = store.insert(entry("dose is 50mg", vec![1.0, 0.0]), "a").await.unwrap();
        let update = MemoryUpdate { trust_score: Some(0.9), ..Default::default() };
        store.update(&id, 1, update, "a").await.unwrap();
        store.save_snapshot(&path).await.unwrap();

        // Corrupt the line holding version 2.
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        lines[1] = "{truncated".into();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let (loaded, report) = InMemoryStore::load_snapshot(&path, model(), Arc::new(AuditLog::new()))
            .await
            .unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.relinked, vec![id.clone()]);

        let head = loaded.resolve(&id).await.unwrap().unwrap();
        assert_eq!(head.id, id);
        assert!(head.is_current());
        let hits = loaded.search(&[1.0, 0.0], &SearchFilters::default(), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, id);

        // The repaired version accepts a new correction.
        let update = MemoryUpdate { trust_score: Some(0.7), ..Default::default() };
        assert!(loaded.update(&id, 1, update, "a").await.is_ok());
    }

    #[tokio::test]
    async fn missing_snapshot_gives_empty_store() {
        let (store, report) = InMemoryStore::load_snapshot(
            Path::new("/nonexistent/memory.jsonl"),
            model(),
            Arc::new(AuditLog::new()),
        )
        .await
        .unwrap();
        assert_eq!(report.loaded, 0);
        assert_eq!(store.stats().await.unwrap().total_versions, 0);
    }
}
