//! Audit sinks for role changes, revocations and access denials.
//! Sinks are fire-and-forget: a sink that cannot write drops the event and never
//! blocks or fails the authorization decision that produced it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: uuid::Uuid,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub level: AuditLevel,
    pub message: String,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl AuditEvent {
    pub fn new(level: AuditLevel, message: impl Into<String>) -> Self {
        Self { id: uuid::Uuid::new_v4(), ts: chrono::Utc::now(), level, message: message.into(), fields: Map::new() }
    }

    pub fn info(message: impl Into<String>) -> Self { Self::new(AuditLevel::Info, message) }
    pub fn warn(message: impl Into<String>) -> Self { Self::new(AuditLevel::Warn, message) }

    pub fn field(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> { self.fields.get(key).and_then(|v| v.as_str()) }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Forwards events into `tracing` under the `rolegate::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, ev: &AuditEvent) {
        let fields = JsonValue::Object(ev.fields.clone());
        match ev.level {
            AuditLevel::Info => info!(target: "rolegate::audit", event_id = %ev.id, fields = %fields, "{}", ev.message),
            AuditLevel::Warn => warn!(target: "rolegate::audit", event_id = %ev.id, fields = %fields, "{}", ev.message),
        }
    }
}

/// Appends one compact JSON object per event to a file.
pub struct JsonlFileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
        Self { path, lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl AuditSink for JsonlFileSink {
    fn emit(&self, ev: &AuditEvent) {
        let line = match serde_json::to_string(ev) {
            Ok(s) => s,
            Err(e) => { debug!(target: "rolegate::audit", "jsonl sink: encode failed: {}", e); return; }
        };
        let _g = self.lock.lock();
        match std::fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(&mut f, "{}", line) {
                    debug!(target: "rolegate::audit", "jsonl sink: write to '{}' failed: {}", self.path.display(), e);
                }
            }
            Err(e) => debug!(target: "rolegate::audit", "jsonl sink: open '{}' failed: {}", self.path.display(), e),
        }
    }
}

/// Keeps every event in memory; handy for hosts that surface recent audit lines.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }
    pub fn events(&self) -> Vec<AuditEvent> { self.events.lock().clone() }
    pub fn len(&self) -> usize { self.events.lock().len() }
    pub fn is_empty(&self) -> bool { self.events.lock().is_empty() }
    pub fn clear(&self) { self.events.lock().clear(); }
    pub fn with_message(&self, message: &str) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| e.message == message).cloned().collect()
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, ev: &AuditEvent) { self.events.lock().push(ev.clone()); }
}

/// Broadcasts each event to every inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new() -> Self { Self::default() }
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self { self.sinks.push(sink); self }
    pub fn len(&self) -> usize { self.sinks.len() }
    pub fn is_empty(&self) -> bool { self.sinks.is_empty() }
}

impl AuditSink for FanoutSink {
    fn emit(&self, ev: &AuditEvent) {
        for s in self.sinks.iter() { s.emit(ev); }
    }
}
