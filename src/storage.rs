//!
//! rolegate durable key-value collaborator
//! ----------------------------------------
//! A tiny collection/key -> JSON value store used by the role assignment store.
//! Two backends share the [`KvBackend`] trait:
//! - [`MemoryKv`]: process-local maps, nothing survives a restart.
//! - [`FileKv`]: one bincode snapshot per collection under a root directory,
//!   rewritten through a temp file + rename on every mutation so readers of the
//!   file never see a half-written snapshot.
//!
//! Writes hold the collection lock across the disk write; a concurrent `get`
//! therefore observes either the previous or the new record, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{AccessError, AccessResult};

pub trait KvBackend: Send + Sync {
    fn get(&self, collection: &str, key: &str) -> AccessResult<Option<JsonValue>>;
    fn set(&self, collection: &str, key: &str, value: JsonValue) -> AccessResult<()>;
    fn get_all(&self, collection: &str) -> AccessResult<BTreeMap<String, JsonValue>>;
    /// Returns true if the key existed.
    fn delete(&self, collection: &str, key: &str) -> AccessResult<bool>;
}

/// Caller-owned cancellation flag; clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }

    /// Err(Cancelled) once `cancel` has been called.
    pub fn check(&self, operation: &str) -> AccessResult<()> {
        if self.is_cancelled() { Err(AccessError::cancelled(operation)) } else { Ok(()) }
    }
}

type Collection = HashMap<String, JsonValue>;

#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<HashMap<String, Collection>>,
}

impl MemoryKv {
    pub fn new() -> Self { Self::default() }
}

impl KvBackend for MemoryKv {
    fn get(&self, collection: &str, key: &str) -> AccessResult<Option<JsonValue>> {
        Ok(self.map.read().get(collection).and_then(|c| c.get(key)).cloned())
    }

    fn set(&self, collection: &str, key: &str, value: JsonValue) -> AccessResult<()> {
        self.map.write().entry(collection.to_string()).or_default().insert(key.to_string(), value);
        Ok(())
    }

    fn get_all(&self, collection: &str) -> AccessResult<BTreeMap<String, JsonValue>> {
        Ok(self.map.read().get(collection).map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default())
    }

    fn delete(&self, collection: &str, key: &str) -> AccessResult<bool> {
        Ok(self.map.write().get_mut(collection).map(|c| c.remove(key).is_some()).unwrap_or(false))
    }
}

// JSON values go into the snapshot as bytes; bincode cannot drive serde_json's
// self-describing Value directly.
#[derive(Serialize, Deserialize)]
struct SnapEntry { key: String, json: Vec<u8> }
#[derive(Serialize, Deserialize)]
struct Snapshot { version: u32, created_ms: i64, entries: Vec<SnapEntry> }

const SNAPSHOT_VERSION: u32 = 1;

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// File-backed store rooted at a directory; collections are loaded lazily and cached.
pub struct FileKv {
    root: PathBuf,
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
}

impl FileKv {
    pub fn open(root: impl AsRef<Path>) -> AccessResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        debug!(target: "rolegate::storage", "FileKv::open root='{}'", root.display());
        Ok(Self { root, collections: RwLock::new(HashMap::new()) })
    }

    pub fn root_path(&self) -> &Path { &self.root }

    fn snapshot_path(&self, collection: &str) -> PathBuf {
        self.root.join(sanitize_filename(collection)).join("snapshot.bin")
    }

    fn load_snapshot(&self, collection: &str) -> AccessResult<Collection> {
        let path = self.snapshot_path(collection);
        if !path.exists() { return Ok(Collection::new()); }
        let bytes = std::fs::read(&path)?;
        let snap: Snapshot = bincode::deserialize(&bytes)?;
        if snap.version != SNAPSHOT_VERSION {
            return Err(AccessError::storage("snapshot_version", format!("unsupported snapshot version {} in '{}'", snap.version, path.display())));
        }
        let mut out = Collection::with_capacity(snap.entries.len());
        for e in snap.entries.into_iter() {
            let v: JsonValue = serde_json::from_slice(&e.json)?;
            out.insert(e.key, v);
        }
        debug!(target: "rolegate::storage", "loaded collection '{}' entries={}", collection, out.len());
        Ok(out)
    }

    fn save_snapshot(&self, collection: &str, data: &Collection) -> AccessResult<()> {
        let path = self.snapshot_path(collection);
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir)?; }
        let mut entries = Vec::with_capacity(data.len());
        for (k, v) in data.iter() {
            entries.push(SnapEntry { key: k.clone(), json: serde_json::to_vec(v)? });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let snap = Snapshot { version: SNAPSHOT_VERSION, created_ms: chrono::Utc::now().timestamp_millis(), entries };
        let bytes = bincode::serialize(&snap)?;
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn collection(&self, name: &str) -> AccessResult<Arc<RwLock<Collection>>> {
        // Fast path read
        if let Some(c) = self.collections.read().get(name).cloned() { return Ok(c); }
        let mut w = self.collections.write();
        if let Some(c) = w.get(name).cloned() { return Ok(c); }
        let loaded = Arc::new(RwLock::new(self.load_snapshot(name)?));
        w.insert(name.to_string(), loaded.clone());
        Ok(loaded)
    }
}

impl KvBackend for FileKv {
    fn get(&self, collection: &str, key: &str) -> AccessResult<Option<JsonValue>> {
        Ok(self.collection(collection)?.read().get(key).cloned())
    }

    fn set(&self, collection: &str, key: &str, value: JsonValue) -> AccessResult<()> {
        let c = self.collection(collection)?;
        let mut w = c.write();
        let previous = w.insert(key.to_string(), value);
        if let Err(e) = self.save_snapshot(collection, &w) {
            // Keep memory and disk in agreement when the write fails.
            match previous {
                Some(v) => { w.insert(key.to_string(), v); }
                None => { w.remove(key); }
            }
            return Err(e);
        }
        Ok(())
    }

    fn get_all(&self, collection: &str) -> AccessResult<BTreeMap<String, JsonValue>> {
        Ok(self.collection(collection)?.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn delete(&self, collection: &str, key: &str) -> AccessResult<bool> {
        let c = self.collection(collection)?;
        let mut w = c.write();
        let Some(previous) = w.remove(key) else { return Ok(false); };
        if let Err(e) = self.save_snapshot(collection, &w) {
            w.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }
}
