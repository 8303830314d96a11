//! Audit Log
//!
//! Structured, append-only record of what each workflow run did. Separate
//! from `tracing` diagnostics: these events are meant to be kept.

use crate::error::{AgentError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub level: AuditLevel,
    pub event: String,
    pub data: Value,
}

impl AuditEvent {
    pub fn new(session_id: &str, level: AuditLevel, event: &str, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            level,
            event: event.to_string(),
            data,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Record an event, downgrading sink failures to a warning
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(&event) {
        warn!("Failed to write audit event {}: {}", event.event, e);
    }
}

/// One JSON object per line, one file per UTC day (`audit_YYYYMMDD.jsonl`)
pub struct JsonlAuditLog {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn file_for(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("audit_{}.jsonl", timestamp.format("%Y%m%d")))
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AgentError::Audit("audit log lock poisoned".to_string()))?;

        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(&event.timestamp))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Keeps events in memory; used by tests and embedding callers
#[derive(Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event).collect()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| AgentError::Audit("audit log lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}
