//! Request/response audit trail.
//!
//! The translator hands every canonical and raw payload to an [`AuditSink`].
//! Writes are fire-and-forget: a failing sink is reported through `tracing`
//! and never fails the request that produced the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MAX_AUDIT_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    #[serde(rename = "REQ")]
    Req,
    #[serde(rename = "RES")]
    Res,
    #[serde(rename = "REQ-RAW")]
    ReqRaw,
    #[serde(rename = "RES-RAW")]
    ResRaw,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Req => "REQ",
            Self::Res => "RES",
            Self::ReqRaw => "REQ-RAW",
            Self::ResRaw => "RES-RAW",
        }
    }
}

/// Receives opaque payloads tagged with a kind and the provider name.
pub trait AuditSink: Send + Sync {
    fn write(&self, payload: &serde_json::Value, kind: AuditKind, provider: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn write(&self, _payload: &serde_json::Value, _kind: AuditKind, _provider: &str) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub provider: String,
    pub payload: serde_json::Value,
}

/// Ring buffer of recent entries, optionally persisted to a JSONL file.
struct AuditLog {
    entries: VecDeque<AuditEntry>,
    file_path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl AuditLog {
    fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            file_path: None,
            writer: None,
        }
    }

    fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries = VecDeque::new();

        if file_path.exists() {
            let file = File::open(&file_path)?;
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) {
                    if entries.len() >= MAX_AUDIT_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            entries,
            file_path: Some(file_path),
            writer: Some(BufWriter::new(file)),
        })
    }

    fn append(&mut self, entry: AuditEntry) -> std::io::Result<()> {
        let persisted = match self.writer {
            Some(ref mut writer) => {
                let json = serde_json::to_string(&entry)?;
                writeln!(writer, "{json}").and_then(|()| writer.flush())
            }
            None => Ok(()),
        };
        if self.entries.len() >= MAX_AUDIT_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        persisted
    }

    fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

/// Cloneable, thread-safe audit sink. Clones share one log.
#[derive(Clone)]
pub struct JsonlAuditSink(Arc<Mutex<AuditLog>>);

impl JsonlAuditSink {
    /// Persist to `file_path` (JSONL), loading any entries already there.
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(AuditLog::open(file_path)?))))
    }

    /// Keep entries in memory only.
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(AuditLog::in_memory())))
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.0.lock().ok().and_then(|l| l.file_path.clone())
    }
}

impl AuditSink for JsonlAuditSink {
    fn write(&self, payload: &serde_json::Value, kind: AuditKind, provider: &str) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            kind,
            provider: provider.to_string(),
            payload: payload.clone(),
        };
        match self.0.lock() {
            Ok(mut log) => {
                if let Err(e) = log.append(entry) {
                    tracing::warn!(kind = kind.as_str(), provider, error = %e, "audit write failed");
                }
            }
            Err(_) => tracing::warn!(kind = kind.as_str(), provider, "audit log lock poisoned"),
        }
    }
}

/// Serialize `value` and hand it to `sink`; serialization failures are logged.
pub(crate) fn record<T: Serialize>(sink: &dyn AuditSink, value: &T, kind: AuditKind, provider: &str) {
    match serde_json::to_value(value) {
        Ok(payload) => sink.write(&payload, kind, provider),
        Err(e) => tracing::warn!(kind = kind.as_str(), provider, error = %e, "audit payload not serializable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_keeps_recent_first() {
        let log = JsonlAuditSink::in_memory();
        log.write(&serde_json::json!({"n": 1}), AuditKind::Req, "openai");
        log.write(&serde_json::json!({"n": 2}), AuditKind::Res, "openai");

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AuditKind::Res);
        assert_eq!(recent[1].payload["n"], 1);
        assert!(log.path().is_none());
    }

    #[test]
    fn test_jsonl_file_round_trips_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("bridge.jsonl");

        {
            let log = JsonlAuditSink::open(&path).unwrap();
            log.write(&serde_json::json!({"model": "gpt-4o"}), AuditKind::ReqRaw, "openai");
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"REQ-RAW\""));

        let reopened = JsonlAuditSink::open(&path).unwrap();
        let recent = reopened.recent(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].provider, "openai");
        assert_eq!(recent[0].payload["model"], "gpt-4o");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(serde_json::to_string(&AuditKind::ResRaw).unwrap(), "\"RES-RAW\"");
        assert_eq!(AuditKind::Req.as_str(), "REQ");
    }
}
