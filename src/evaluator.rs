//! Stateless authorization evaluator over a [`PermissionCatalog`].
//! Deny precedence: a matching `cannot_access` pattern blocks before any allow
//! pattern is consulted. Every answer carries a short reason code for audit trails.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::{Grant, PermissionCatalog, PermissionSet, Role, RoutePattern};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allow: bool,
    pub reason: &'static str,
}

impl Decision {
    fn allow(reason: &'static str) -> Self { Self { allow: true, reason } }
    fn deny(reason: &'static str) -> Self { Self { allow: false, reason } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    View,
    Edit,
    Create,
    Delete,
}

impl Capability {
    pub const ALL: [Capability; 4] = [Capability::View, Capability::Edit, Capability::Create, Capability::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Edit => "edit",
            Capability::Create => "create",
            Capability::Delete => "delete",
        }
    }

    fn grants(self, set: &PermissionSet) -> &[Grant] {
        match self {
            Capability::View => &set.can_view,
            Capability::Edit => &set.can_edit,
            Capability::Create => &set.can_create,
            Capability::Delete => &set.can_delete,
        }
    }
}

impl FromStr for Capability {
    type Err = crate::error::AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == t)
            .ok_or_else(|| crate::error::AccessError::invalid("unknown_capability", format!("unknown capability '{}'", s.trim())))
    }
}

/// One access question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query<'a> {
    Route(&'a str),
    Resource(Capability, &'a str),
    Action(&'a str),
}

fn any_match(patterns: &[RoutePattern], path: &str) -> bool { patterns.iter().any(|p| p.matches(path)) }

fn granted(grants: &[Grant], token: &str) -> Decision {
    if grants.iter().any(|g| matches!(g, Grant::All)) { return Decision::allow("grant_all"); }
    if grants.iter().any(|g| g.covers(token)) { return Decision::allow("grant_named"); }
    Decision::deny("not_granted")
}

pub fn evaluate_route(catalog: &PermissionCatalog, role: Option<Role>, path: &str) -> Decision {
    let Some(role) = role else {
        return if any_match(catalog.public_routes(), path) { Decision::allow("public_route") } else { Decision::deny("unauthenticated") };
    };
    let set = catalog.get(role);
    if any_match(&set.cannot_access, path) { return Decision::deny("deny_pattern"); }
    if any_match(&set.can_access, path) { return Decision::allow("allow_pattern"); }
    Decision::deny("default_deny")
}

pub fn evaluate_resource(catalog: &PermissionCatalog, role: Option<Role>, capability: Capability, resource: &str) -> Decision {
    let Some(role) = role else { return Decision::deny("unauthenticated"); };
    granted(capability.grants(catalog.get(role)), resource)
}

pub fn evaluate_action(catalog: &PermissionCatalog, role: Option<Role>, action: &str) -> Decision {
    let Some(role) = role else { return Decision::deny("unauthenticated"); };
    granted(&catalog.get(role).actions, action)
}

pub fn evaluate(catalog: &PermissionCatalog, role: Option<Role>, query: Query<'_>) -> Decision {
    match query {
        Query::Route(path) => evaluate_route(catalog, role, path),
        Query::Resource(cap, resource) => evaluate_resource(catalog, role, cap, resource),
        Query::Action(action) => evaluate_action(catalog, role, action),
    }
}

/// Evaluate for a raw role tag coming from outside the crate. An unknown tag has
/// no permissions at all, not even the public routes of an unauthenticated actor.
pub fn evaluate_tag(catalog: &PermissionCatalog, tag: Option<&str>, query: Query<'_>) -> Decision {
    match tag.map(Role::from_str) {
        None => evaluate(catalog, None, query),
        Some(Ok(role)) => evaluate(catalog, Some(role), query),
        Some(Err(_)) => {
            tracing::debug!(target: "rolegate::evaluator", "evaluate_tag: unknown role tag {:?}", tag);
            Decision::deny("unknown_role")
        }
    }
}

pub fn can_access_route(catalog: &PermissionCatalog, role: Option<Role>, path: &str) -> bool { evaluate_route(catalog, role, path).allow }

pub fn can_view_resource(catalog: &PermissionCatalog, role: Option<Role>, resource: &str) -> bool { evaluate_resource(catalog, role, Capability::View, resource).allow }
pub fn can_edit_resource(catalog: &PermissionCatalog, role: Option<Role>, resource: &str) -> bool { evaluate_resource(catalog, role, Capability::Edit, resource).allow }
pub fn can_create_resource(catalog: &PermissionCatalog, role: Option<Role>, resource: &str) -> bool { evaluate_resource(catalog, role, Capability::Create, resource).allow }
pub fn can_delete_resource(catalog: &PermissionCatalog, role: Option<Role>, resource: &str) -> bool { evaluate_resource(catalog, role, Capability::Delete, resource).allow }

pub fn has_permission(catalog: &PermissionCatalog, role: Option<Role>, action: &str) -> bool { evaluate_action(catalog, role, action).allow }

#[cfg(test)]
#[path = "evaluator_tests.rs"]
mod evaluator_tests;
