//! Configuration and wiring.
//! `GateConfig` comes from a JSON file and/or environment variables; `Gate::open`
//! turns it into the catalog, the file-backed assignment store and a facade.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::AccessControl;
use crate::assignments::RoleAssignments;
use crate::audit::{AuditSink, FanoutSink, JsonlFileSink, TracingSink};
use crate::catalog::PermissionCatalog;
use crate::error::{AccessError, AccessResult};
use crate::storage::FileKv;

pub const ENV_DATA_DIR: &str = "ROLEGATE_DATA_DIR";
pub const ENV_CATALOG: &str = "ROLEGATE_CATALOG";
pub const ENV_AUDIT_LOG: &str = "ROLEGATE_AUDIT_LOG";
pub const ENV_LOG_FILTER: &str = "RUST_LOG";

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct GateConfig {
    /// Root folder for the durable assignment store.
    #[serde(default = "GateConfig::default_data_dir")]
    pub data_dir: PathBuf,
    /// Optional JSON catalog replacing the built-in permission table.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Optional JSONL file receiving audit events in addition to tracing.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    /// tracing-subscriber filter used by binaries.
    #[serde(default = "GateConfig::default_log_filter")]
    pub log_filter: String,
}

impl GateConfig {
    fn default_data_dir() -> PathBuf { PathBuf::from("rolegate_data") }
    fn default_log_filter() -> String { "info".to_string() }

    pub fn load(path: &Path) -> AccessResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| AccessError::config("config_read", format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes).map_err(|e| AccessError::config("config_parse", e.to_string()))
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self { Self::default().with_env_overrides() }

    pub fn with_env_overrides(self) -> Self { self.with_overrides(|k| std::env::var(k).ok()) }

    /// Apply overrides from any key lookup; empty values are ignored.
    pub fn with_overrides<F: Fn(&str) -> Option<String>>(mut self, lookup: F) -> Self {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_DATA_DIR) { self.data_dir = PathBuf::from(v); }
        if let Some(v) = get(ENV_CATALOG) { self.catalog_path = Some(PathBuf::from(v)); }
        if let Some(v) = get(ENV_AUDIT_LOG) { self.audit_log = Some(PathBuf::from(v)); }
        if let Some(v) = get(ENV_LOG_FILTER) { self.log_filter = v; }
        self
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { data_dir: Self::default_data_dir(), catalog_path: None, audit_log: None, log_filter: Self::default_log_filter() }
    }
}

/// Fully wired authorization core for one process.
pub struct Gate {
    pub catalog: Arc<PermissionCatalog>,
    pub assignments: RoleAssignments,
    pub access: AccessControl,
    pub sink: Arc<dyn AuditSink>,
}

impl Gate {
    pub fn open(cfg: &GateConfig) -> AccessResult<Self> {
        let catalog = Arc::new(match &cfg.catalog_path {
            Some(p) => PermissionCatalog::load(p)?,
            None => PermissionCatalog::builtin(),
        });
        let mut fan = FanoutSink::new().with(Arc::new(TracingSink));
        if let Some(p) = &cfg.audit_log { fan = fan.with(Arc::new(JsonlFileSink::new(p))); }
        let sink: Arc<dyn AuditSink> = Arc::new(fan);
        let kv = Arc::new(FileKv::open(&cfg.data_dir)?);
        info!(
            target: "rolegate",
            "gate open: data_dir='{}' catalog={} audit_log={}",
            cfg.data_dir.display(),
            cfg.catalog_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<builtin>".to_string()),
            cfg.audit_log.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<none>".to_string()),
        );
        Ok(Self {
            assignments: RoleAssignments::with_sink(kv, sink.clone()),
            access: AccessControl::with_sink(catalog.clone(), sink.clone()),
            catalog,
            sink,
        })
    }
}
