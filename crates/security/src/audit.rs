//! Audit logging: append-only record of memory mutations.
//!
//! The log keeps every record in memory in commit order and forwards each
//! one to its sinks. A record is kept only once every sink has accepted it,
//! so a failed write leaves the log as it was. Records are never removed.

use advisor_core::audit::AuditLogEntry;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit I/O error at {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Malformed audit record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Audit sink '{sink}' rejected the record: {reason}")]
    Sink { sink: String, reason: String },
}

/// Where audit records are written as they are appended.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditError>;

    /// Write several records as one unit.
    fn record_all(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError> {
        entries.iter().try_for_each(|e| self.record(e))
    }
}

/// In-memory append-only audit log.
pub struct AuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks: Vec::new(),
        }
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Seed the log with previously persisted records. Sinks are not
    /// notified; these records were already written once.
    pub fn restore(&self, records: Vec<AuditLogEntry>) {
        let mut entries = self.lock();
        entries.extend(records);
        entries.sort_by_key(|e| e.sequence);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditLogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record, assigning its sequence number. Returns the stored record.
    pub fn append(&self, mut entry: AuditLogEntry) -> Result<AuditLogEntry, AuditError> {
        let mut entries = self.lock();
        entry.sequence = entries.last().map_or(1, |last| last.sequence + 1);
        for sink in &self.sinks {
            sink.record(&entry)?;
        }
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Append records with consecutive sequence numbers. Either every sink
    /// accepts all of them and they are kept, or none are kept.
    pub fn append_all(&self, mut records: Vec<AuditLogEntry>) -> Result<Vec<AuditLogEntry>, AuditError> {
        let mut entries = self.lock();
        let mut next = entries.last().map_or(1, |last| last.sequence + 1);
        for record in &mut records {
            record.sequence = next;
            next += 1;
        }
        for sink in &self.sinks {
            sink.record_all(&records)?;
        }
        entries.extend(records.iter().cloned());
        Ok(records)
    }

    /// All records in commit order.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.lock().clone()
    }

    /// Records concerning one entry id.
    pub fn entries_for(&self, entry_id: &str) -> Vec<AuditLogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.entry_id == entry_id)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Write every record as one JSON object per line.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> std::io::Result<usize> {
        let entries = self.entries();
        for entry in &entries {
            let line = serde_json::to_string(entry)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(entries.len())
    }

    /// Export the full log to `path`, replacing any file already there.
    pub fn export_jsonl(&self, path: &Path) -> Result<usize, AuditError> {
        let io_err = |e: std::io::Error| AuditError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let file = std::fs::File::create(path).map_err(io_err)?;
        let count = self.write_jsonl(std::io::BufWriter::new(file)).map_err(io_err)?;
        tracing::info!(path = %path.display(), records = count, "Exported audit log");
        Ok(count)
    }

    /// Read a JSONL audit file. A missing file yields no records.
    pub fn read_jsonl(path: &Path) -> Result<Vec<AuditLogEntry>, AuditError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(path).map_err(|e| AuditError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| AuditError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| AuditError::Malformed {
                line: i + 1,
                reason: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        tracing::info!(
            sequence = entry.sequence,
            entry_id = %entry.entry_id,
            operation = entry.operation.name(),
            actor = %entry.actor,
            "AUDIT"
        );
        Ok(())
    }
}

/// Appends each record to a JSONL file as it is written.
pub struct JsonlFileSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlFileSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        let io_err = |e: std::io::Error, path: &Path| AuditError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(e, &path))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(e, &path))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlFileSink {
    fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        self.record_all(std::slice::from_ref(entry))
    }

    /// All lines go out in one write followed by a flush.
    fn record_all(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError> {
        let io_err = |reason: String| AuditError::Io {
            path: self.path.clone(),
            reason,
        };
        let mut buf = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(|e| io_err(e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.write_all(buf.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to append audit records");
                io_err(e.to_string())
            })
    }
}
