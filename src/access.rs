//! Access control facade: the "who is acting now" handle plus evaluator wrappers.
//!
//! One `AccessControl` is built per session/context by the host and handed to
//! every guard that needs it. The current role is a `Copy` value behind a lock,
//! so a reader sees either the old or the new role, never a mix.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::assignments::RoleAssignments;
use crate::audit::{AuditEvent, AuditSink, TracingSink};
use crate::catalog::{PermissionCatalog, Role};
use crate::error::{AccessError, AccessResult};
use crate::evaluator::{self, Capability, Decision};

fn role_field(role: Option<Role>) -> Option<&'static str> { role.map(Role::as_str) }

pub struct AccessControl {
    catalog: Arc<PermissionCatalog>,
    current: RwLock<Option<Role>>,
    sink: Arc<dyn AuditSink>,
}

impl AccessControl {
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self { Self::with_sink(catalog, Arc::new(TracingSink)) }

    pub fn with_sink(catalog: Arc<PermissionCatalog>, sink: Arc<dyn AuditSink>) -> Self {
        Self { catalog, current: RwLock::new(None), sink }
    }

    pub fn catalog(&self) -> &PermissionCatalog { &self.catalog }

    /// Replace the current role and audit the switch.
    pub fn set_role(&self, role: Option<Role>) {
        let previous = std::mem::replace(&mut *self.current.write(), role);
        debug!(target: "rolegate::access", "set_role {:?} -> {:?}", previous, role);
        self.sink.emit(
            &AuditEvent::info("role.set")
                .field("role", role_field(role))
                .field("previous_role", role_field(previous)),
        );
    }

    /// Back to unauthenticated.
    pub fn clear_role(&self) { self.set_role(None); }

    pub fn role(&self) -> Option<Role> { *self.current.read() }

    /// Install the role persisted for `actor_id` (absent if never assigned).
    pub fn hydrate(&self, assignments: &RoleAssignments, actor_id: &str) -> AccessResult<Option<Role>> {
        let role = assignments.role_for(actor_id)?;
        self.set_role(role);
        Ok(role)
    }

    fn effective(&self, role_override: Option<Role>) -> Option<Role> { role_override.or_else(|| self.role()) }

    pub fn decide_route(&self, path: &str, role_override: Option<Role>) -> Decision {
        let role = self.effective(role_override);
        let d = evaluator::evaluate_route(&self.catalog, role, path);
        if !d.allow {
            self.sink.emit(
                &AuditEvent::warn("access.denied")
                    .field("role", role_field(role))
                    .field("path", path)
                    .field("reason", d.reason),
            );
        }
        d
    }

    /// Route guard; denials are audited with the role and the rejected path.
    pub fn can_access(&self, path: &str, role_override: Option<Role>) -> bool { self.decide_route(path, role_override).allow }

    pub fn can_use(&self, capability: Capability, resource: &str, role_override: Option<Role>) -> bool {
        evaluator::evaluate_resource(&self.catalog, self.effective(role_override), capability, resource).allow
    }

    pub fn can_view(&self, resource: &str, role_override: Option<Role>) -> bool { self.can_use(Capability::View, resource, role_override) }
    pub fn can_edit(&self, resource: &str, role_override: Option<Role>) -> bool { self.can_use(Capability::Edit, resource, role_override) }
    pub fn can_create(&self, resource: &str, role_override: Option<Role>) -> bool { self.can_use(Capability::Create, resource, role_override) }
    pub fn can_delete(&self, resource: &str, role_override: Option<Role>) -> bool { self.can_use(Capability::Delete, resource, role_override) }

    pub fn has_permission(&self, action: &str, role_override: Option<Role>) -> bool {
        evaluator::has_permission(&self.catalog, self.effective(role_override), action)
    }

    pub fn assert_access(&self, path: &str, role_override: Option<Role>) -> AccessResult<()> {
        if self.can_access(path, role_override) { return Ok(()); }
        Err(AccessError::RouteDenied { role: self.effective(role_override), path: path.to_string() })
    }

    pub fn assert_permission(&self, action: &str, role_override: Option<Role>) -> AccessResult<()> {
        if self.has_permission(action, role_override) { return Ok(()); }
        Err(AccessError::PermissionDenied { role: self.effective(role_override), action: action.to_string() })
    }
}
