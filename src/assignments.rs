//! Persisted actor -> role assignments.
//!
//! Records live in the `role_assignments` collection of a [`KvBackend`], keyed by
//! the normalized actor id. Assignment is an upsert (last write wins). Revocation
//! never deletes: it re-assigns [`DEFAULT_ROLE`] so a known actor always resolves
//! to some role, and it is audited under its own event name.
//!
//! An in-process cache sits in front of the backend. Writes update the backend
//! and the cache inside one critical section and bump an epoch counter, so a
//! `role_for` issued after `assign`/`revoke` returns sees the new role. A reader
//! filling the cache from the backend only inserts when no write landed since it
//! started reading, and never replaces an entry a writer already put there.
//!
//! Only backend hits are cached, so the cache never holds more entries than the
//! collection has records; `invalidate_cache` empties it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::audit::{AuditEvent, AuditSink, TracingSink};
use crate::catalog::{Role, DEFAULT_ROLE};
use crate::error::{AccessError, AccessResult};
use crate::storage::{CancelSignal, KvBackend};

pub const ASSIGNMENTS_COLLECTION: &str = "role_assignments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub actor_id: String,
    pub role: Role,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Assigned,
    Revoked,
}

impl ChangeKind {
    fn event_name(self) -> &'static str {
        match self {
            ChangeKind::Assigned => "assignment.granted",
            ChangeKind::Revoked => "assignment.revoked",
        }
    }
}

/// Observer for session layers that keep their own copy of an actor's role.
pub trait AssignmentHook: Send + Sync {
    fn on_change(&self, assignment: &RoleAssignment, kind: ChangeKind);
}

/// Trim, NFKC-normalize and lowercase an external actor id (wallet addresses
/// arrive in mixed-case checksum form).
pub fn normalize_actor_id(raw: &str) -> AccessResult<String> {
    let id: String = raw.trim().nfkc().collect::<String>().to_lowercase();
    if id.is_empty() {
        return Err(AccessError::invalid("empty_actor_id", "actor id must not be empty"));
    }
    Ok(id)
}

pub fn is_admin_role(role: Option<Role>) -> bool { role.map(Role::is_admin).unwrap_or(false) }
pub fn is_business_role(role: Option<Role>) -> bool { role.map(Role::is_business).unwrap_or(false) }
pub fn is_driver_role(role: Option<Role>) -> bool { role.map(Role::is_driver).unwrap_or(false) }

fn decode(value: serde_json::Value) -> AccessResult<RoleAssignment> {
    serde_json::from_value(value).map_err(AccessError::from)
}

pub struct RoleAssignments {
    kv: Arc<dyn KvBackend>,
    sink: Arc<dyn AuditSink>,
    // Bounded by the number of stored records; misses are not cached.
    cache: RwLock<HashMap<String, RoleAssignment>>,
    // Bumped while holding the cache write lock.
    epoch: AtomicU64,
    hooks: RwLock<Vec<Arc<dyn AssignmentHook>>>,
    // Serializes backend upsert + cache update so the cache always holds the last write.
    write_lock: Mutex<()>,
}

impl RoleAssignments {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self { Self::with_sink(kv, Arc::new(TracingSink)) }

    pub fn with_sink(kv: Arc<dyn KvBackend>, sink: Arc<dyn AuditSink>) -> Self {
        Self { kv, sink, cache: RwLock::new(HashMap::new()), epoch: AtomicU64::new(1), hooks: RwLock::new(Vec::new()), write_lock: Mutex::new(()) }
    }

    pub fn add_hook(&self, hook: Arc<dyn AssignmentHook>) { self.hooks.write().push(hook); }

    /// Bumped on every successful write; session layers compare it to detect change.
    pub fn epoch(&self) -> u64 { self.epoch.load(Ordering::SeqCst) }

    /// Drop cached records so the next lookups re-read the backend.
    pub fn invalidate_cache(&self) {
        let mut cache = self.cache.write();
        cache.clear();
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn assign(&self, actor_id: &str, role: Role, granted_by: Option<&str>) -> AccessResult<RoleAssignment> {
        self.assign_with(actor_id, role, granted_by, &CancelSignal::new())
    }

    pub fn assign_with(&self, actor_id: &str, role: Role, granted_by: Option<&str>, cancel: &CancelSignal) -> AccessResult<RoleAssignment> {
        self.upsert(actor_id, role, granted_by, ChangeKind::Assigned, cancel)
    }

    pub fn revoke(&self, actor_id: &str, revoked_by: Option<&str>) -> AccessResult<RoleAssignment> {
        self.revoke_with(actor_id, revoked_by, &CancelSignal::new())
    }

    pub fn revoke_with(&self, actor_id: &str, revoked_by: Option<&str>, cancel: &CancelSignal) -> AccessResult<RoleAssignment> {
        self.upsert(actor_id, DEFAULT_ROLE, revoked_by, ChangeKind::Revoked, cancel)
    }

    fn upsert(&self, actor_id: &str, role: Role, by: Option<&str>, kind: ChangeKind, cancel: &CancelSignal) -> AccessResult<RoleAssignment> {
        let actor_id = normalize_actor_id(actor_id)?;
        let assigned_by = match by {
            Some(b) => Some(normalize_actor_id(b)?),
            None => None,
        };
        let op = match kind { ChangeKind::Assigned => "assign", ChangeKind::Revoked => "revoke" };
        cancel.check(op)?;

        let record = RoleAssignment { actor_id: actor_id.clone(), role, assigned_at: Utc::now(), assigned_by };
        let value = serde_json::to_value(&record)?;
        let previous = {
            let _g = self.write_lock.lock();
            let previous = self.previous_role(&actor_id)?;
            cancel.check(op)?;
            self.kv.set(ASSIGNMENTS_COLLECTION, &actor_id, value)?;
            let mut cache = self.cache.write();
            cache.insert(actor_id.clone(), record.clone());
            self.epoch.fetch_add(1, Ordering::SeqCst);
            previous
        };

        info!(target: "rolegate::assignments", "{} actor={} role={} previous={:?} by={:?}", op, actor_id, role, previous, record.assigned_by);
        let mut ev = AuditEvent::info(kind.event_name())
            .field("actor_id", actor_id.as_str())
            .field("role", role.as_str())
            .field("previous_role", previous.map(|r| r.as_str()));
        if let Some(by) = record.assigned_by.as_deref() { ev = ev.field("assigned_by", by); }
        self.sink.emit(&ev);
        for h in self.hooks.read().iter() { h.on_change(&record, kind); }
        Ok(record)
    }

    // Role being replaced, for the log line and audit event only. An undecodable
    // record must not block the write that repairs it.
    fn previous_role(&self, actor_id: &str) -> AccessResult<Option<Role>> {
        match self.lookup(actor_id) {
            Ok(found) => Ok(found.map(|a| a.role)),
            Err(AccessError::Storage { code, message }) if code == "corrupt_record" => {
                warn!(target: "rolegate::assignments", "overwriting undecodable record for '{}': {}", actor_id, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // Cache first, then backend; fills the cache on a backend hit unless a write
    // or invalidation happened since the read started.
    fn lookup(&self, actor_id: &str) -> AccessResult<Option<RoleAssignment>> {
        if let Some(hit) = self.cache.read().get(actor_id).cloned() { return Ok(Some(hit)); }
        let seen = self.epoch();
        let Some(value) = self.kv.get(ASSIGNMENTS_COLLECTION, actor_id)? else { return Ok(None); };
        let record = decode(value)?;
        let mut cache = self.cache.write();
        if self.epoch() == seen {
            cache.entry(actor_id.to_string()).or_insert_with(|| record.clone());
            debug!(target: "rolegate::assignments", "cache fill actor={} role={}", actor_id, record.role);
        }
        Ok(Some(record))
    }

    pub fn assignment_for(&self, actor_id: &str) -> AccessResult<Option<RoleAssignment>> {
        let actor_id = normalize_actor_id(actor_id)?;
        self.lookup(&actor_id)
    }

    /// None when the actor was never assigned a role.
    pub fn role_for(&self, actor_id: &str) -> AccessResult<Option<Role>> {
        Ok(self.assignment_for(actor_id)?.map(|a| a.role))
    }

    /// Like [`role_for`](Self::role_for) but a failed read degrades to "absent" with a warning.
    pub fn role_for_or_absent(&self, actor_id: &str) -> Option<Role> {
        match self.role_for(actor_id) {
            Ok(role) => role,
            Err(e) => {
                warn!(target: "rolegate::assignments", "role lookup for '{}' failed, treating as unassigned: {}", actor_id, e);
                None
            }
        }
    }

    /// Every stored assignment keyed by actor id, read from the backend.
    pub fn list_all(&self) -> AccessResult<BTreeMap<String, RoleAssignment>> {
        let _g = self.write_lock.lock();
        let raw = self.kv.get_all(ASSIGNMENTS_COLLECTION)?;
        let mut out = BTreeMap::new();
        for (k, v) in raw.into_iter() { out.insert(k, decode(v)?); }
        let mut cache = self.cache.write();
        for (k, v) in out.iter() { cache.insert(k.clone(), v.clone()); }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::storage::MemoryKv;

    fn fixture() -> (RoleAssignments, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (RoleAssignments::with_sink(Arc::new(MemoryKv::new()), sink.clone()), sink)
    }

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(normalize_actor_id("  0xABCdef ").unwrap(), "0xabcdef");
        // Fullwidth digits and letters fold under NFKC.
        assert_eq!(normalize_actor_id("０ｘＡＢ").unwrap(), "0xab");
        assert_eq!(normalize_actor_id("   ").unwrap_err().code_str(), "empty_actor_id");
    }

    #[test]
    fn assign_is_case_insensitive_on_actor() {
        let (s, _) = fixture();
        s.assign("0xABC", Role::Driver, None).unwrap();
        assert_eq!(s.role_for("0xabc").unwrap(), Some(Role::Driver));
        assert_eq!(s.role_for("0XABC").unwrap(), Some(Role::Driver));
        assert_eq!(s.role_for("0xdef").unwrap(), None);
    }

    #[test]
    fn repeated_assign_keeps_one_record_and_two_audit_lines() {
        let (s, sink) = fixture();
        s.assign("0xabc", Role::Sales, Some("0xOWNER")).unwrap();
        s.assign("0xabc", Role::Sales, Some("0xOWNER")).unwrap();
        assert_eq!(s.list_all().unwrap().len(), 1);
        assert_eq!(sink.with_message("assignment.granted").len(), 2);
        let rec = s.assignment_for("0xabc").unwrap().unwrap();
        assert_eq!(rec.assigned_by.as_deref(), Some("0xowner"));
    }

    #[test]
    fn revoke_resets_to_default_and_is_audited_distinctly() {
        let (s, sink) = fixture();
        s.assign("0xabc", Role::Manager, None).unwrap();
        let rec = s.revoke("0xabc", Some("0xboss")).unwrap();
        assert_eq!(rec.role, DEFAULT_ROLE);
        assert_eq!(s.role_for("0xabc").unwrap(), Some(Role::Customer));
        assert!(s.list_all().unwrap().contains_key("0xabc"));
        let revoked = sink.with_message("assignment.revoked");
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].get_str("previous_role"), Some("manager"));
        assert_eq!(revoked[0].get_str("role"), Some("customer"));
    }

    #[test]
    fn epoch_moves_on_every_write() {
        let (s, _) = fixture();
        let e0 = s.epoch();
        s.assign("a", Role::Driver, None).unwrap();
        let e1 = s.epoch();
        s.revoke("a", None).unwrap();
        assert!(e1 > e0 && s.epoch() > e1);
    }

    #[test]
    fn cancelled_assign_writes_nothing() {
        let (s, sink) = fixture();
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = s.assign_with("0xabc", Role::Driver, None, &cancel).unwrap_err();
        assert!(matches!(err, AccessError::Cancelled { .. }));
        assert_eq!(s.role_for("0xabc").unwrap(), None);
        assert!(sink.is_empty());
    }

    #[test]
    fn assign_repairs_an_undecodable_record() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(ASSIGNMENTS_COLLECTION, "0xabc", serde_json::json!({"role": "pilot"})).unwrap();
        let sink = Arc::new(MemorySink::new());
        let s = RoleAssignments::with_sink(kv.clone(), sink.clone());
        assert_eq!(s.role_for("0xabc").unwrap_err().code_str(), "corrupt_record");

        s.assign("0xABC", Role::Driver, None).unwrap();
        assert_eq!(s.role_for("0xabc").unwrap(), Some(Role::Driver));
        s.invalidate_cache();
        assert_eq!(s.role_for("0xabc").unwrap(), Some(Role::Driver));
        let granted = sink.with_message("assignment.granted");
        assert_eq!(granted[0].fields.get("previous_role"), Some(&serde_json::Value::Null));

        kv.set(ASSIGNMENTS_COLLECTION, "0xdef", serde_json::json!({"role": "pilot"})).unwrap();
        assert_eq!(s.revoke("0xdef", None).unwrap().role, DEFAULT_ROLE);
    }

    #[test]
    fn cache_holds_only_stored_records() {
        let (s, _) = fixture();
        s.assign("a", Role::Sales, None).unwrap();
        s.assign("b", Role::Driver, None).unwrap();
        s.invalidate_cache();
        for i in 0..50 { assert_eq!(s.role_for(&format!("ghost{}", i)).unwrap(), None); }
        assert!(s.cache.read().is_empty());
        s.role_for("a").unwrap();
        s.role_for("b").unwrap();
        assert_eq!(s.cache.read().len(), 2);
    }

    struct Recorder(Mutex<Vec<(String, Role, ChangeKind)>>);
    impl AssignmentHook for Recorder {
        fn on_change(&self, a: &RoleAssignment, kind: ChangeKind) { self.0.lock().push((a.actor_id.clone(), a.role, kind)); }
    }

    #[test]
    fn hooks_see_assign_and_revoke() {
        let (s, _) = fixture();
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        s.add_hook(rec.clone());
        s.assign("0xA", Role::Dispatcher, None).unwrap();
        s.revoke("0xA", None).unwrap();
        let seen = rec.0.lock().clone();
        assert_eq!(seen, vec![
            ("0xa".to_string(), Role::Dispatcher, ChangeKind::Assigned),
            ("0xa".to_string(), Role::Customer, ChangeKind::Revoked),
        ]);
    }

    #[test]
    fn predicates_over_resolved_roles() {
        assert!(is_admin_role(Some(Role::BusinessOwner)));
        assert!(!is_admin_role(None));
        assert!(is_business_role(Some(Role::CustomerService)));
        assert!(is_driver_role(Some(Role::Driver)));
        assert!(!is_driver_role(Some(Role::Dispatcher)));
    }
}
