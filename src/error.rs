//! Unified error model for the authorization core.
//! Denials are normal answers from the evaluator; they only become errors through
//! the `assert_*` wrappers on the facade. Everything else here is a real failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessError {
    #[error("unknown role '{tag}'")]
    UnknownRole { tag: String },
    #[error("role {} may not access route '{path}'", role_label(.role))]
    RouteDenied { role: Option<Role>, path: String },
    #[error("role {} lacks permission '{action}'", role_label(.role))]
    PermissionDenied { role: Option<Role>, action: String },
    #[error("{code}: {message}")]
    InvalidInput { code: String, message: String },
    #[error("{code}: {message}")]
    Storage { code: String, message: String },
    #[error("operation '{operation}' was cancelled")]
    Cancelled { operation: String },
    #[error("{code}: {message}")]
    Config { code: String, message: String },
}

fn role_label(role: &Option<Role>) -> &'static str {
    role.map(|r| r.as_str()).unwrap_or("<unauthenticated>")
}

impl AccessError {
    pub fn code_str(&self) -> &str {
        match self {
            AccessError::UnknownRole { .. } => "unknown_role",
            AccessError::RouteDenied { .. } => "route_denied",
            AccessError::PermissionDenied { .. } => "permission_denied",
            AccessError::Cancelled { .. } => "cancelled",
            AccessError::InvalidInput { code, .. }
            | AccessError::Storage { code, .. }
            | AccessError::Config { code, .. } => code.as_str(),
        }
    }

    pub fn invalid(code: impl Into<String>, msg: impl Into<String>) -> Self { AccessError::InvalidInput { code: code.into(), message: msg.into() } }
    pub fn storage(code: impl Into<String>, msg: impl Into<String>) -> Self { AccessError::Storage { code: code.into(), message: msg.into() } }
    pub fn config(code: impl Into<String>, msg: impl Into<String>) -> Self { AccessError::Config { code: code.into(), message: msg.into() } }
    pub fn cancelled(operation: impl Into<String>) -> Self { AccessError::Cancelled { operation: operation.into() } }

    /// True for the two denial variants produced by the `assert_*` wrappers.
    pub fn is_denial(&self) -> bool {
        matches!(self, AccessError::RouteDenied { .. } | AccessError::PermissionDenied { .. })
    }

    /// Map to HTTP status code for front-end guards.
    pub fn http_status(&self) -> u16 {
        match self {
            AccessError::UnknownRole { .. } | AccessError::InvalidInput { .. } => 400,
            AccessError::RouteDenied { .. } | AccessError::PermissionDenied { .. } => 403,
            AccessError::Cancelled { .. } => 499,
            AccessError::Storage { .. } => 503,
            AccessError::Config { .. } => 500,
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

impl From<std::io::Error> for AccessError {
    fn from(err: std::io::Error) -> Self { AccessError::storage("io_error", err.to_string()) }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self { AccessError::storage("corrupt_record", err.to_string()) }
}

impl From<bincode::Error> for AccessError {
    fn from(err: bincode::Error) -> Self { AccessError::storage("corrupt_snapshot", err.to_string()) }
}

impl From<anyhow::Error> for AccessError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as storage unless downcasted elsewhere
        AccessError::storage("storage_error", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AccessError::UnknownRole { tag: "x".into() }.http_status(), 400);
        assert_eq!(AccessError::invalid("bad_input", "oops").http_status(), 400);
        assert_eq!(AccessError::RouteDenied { role: None, path: "/a".into() }.http_status(), 403);
        assert_eq!(AccessError::PermissionDenied { role: Some(Role::Driver), action: "x".into() }.http_status(), 403);
        assert_eq!(AccessError::cancelled("assign").http_status(), 499);
        assert_eq!(AccessError::storage("io_error", "disk").http_status(), 503);
        assert_eq!(AccessError::config("bad_catalog", "x").http_status(), 500);
    }

    #[test]
    fn denial_messages_carry_role_and_target() {
        let e = AccessError::RouteDenied { role: Some(Role::Warehouse), path: "/business/team".into() };
        assert_eq!(e.to_string(), "role warehouse may not access route '/business/team'");
        assert_eq!(e.code_str(), "route_denied");
        assert!(e.is_denial());

        let e = AccessError::PermissionDenied { role: None, action: "refund_order".into() };
        assert_eq!(e.to_string(), "role <unauthenticated> lacks permission 'refund_order'");
        assert!(!AccessError::cancelled("revoke").is_denial());
    }

    #[test]
    fn constructors_accept_mixed_string_kinds() {
        let e = AccessError::storage("snapshot_version", format!("unsupported snapshot version {}", 9));
        assert_eq!(e.code_str(), "snapshot_version");
        assert_eq!(e.to_string(), "snapshot_version: unsupported snapshot version 9");
    }

    #[test]
    fn io_errors_map_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let e: AccessError = io.into();
        assert_eq!(e.code_str(), "io_error");
        assert_eq!(e.http_status(), 503);
    }

    #[test]
    fn serializes_with_type_tag() {
        let e = AccessError::UnknownRole { tag: "pilot".into() };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "unknown_role");
        assert_eq!(v["tag"], "pilot");
    }
}
