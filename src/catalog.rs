//!
//! rolegate permission catalog
//! ---------------------------
//! Static Role -> PermissionSet table. The role set is a closed enum and the
//! built-in table is produced by an exhaustive match, so adding a role without
//! giving it permissions (or without classifying it) fails to compile.
//!
//! A catalog can also be loaded from JSON for deployments that tune route lists
//! without rebuilding; a loaded catalog must still cover every role.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{AccessError, AccessResult};

/// Role every revoked actor falls back to.
pub const DEFAULT_ROLE: Role = Role::Customer;

/// Token meaning "every resource" / "every action" in a capability list.
pub const ALL_TOKEN: &str = "all";

/// Routes an unauthenticated actor may reach.
pub const PUBLIC_ROUTES: &[&str] = &["/", "/login", "/register", "/auth/*", "/store/*", "/about", "/contact"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    InfrastructureOwner,
    BusinessOwner,
    Manager,
    Warehouse,
    Dispatcher,
    Sales,
    CustomerService,
    Driver,
    Customer,
    Anonymous,
}

impl Role {
    pub const ALL: [Role; 10] = [
        Role::InfrastructureOwner,
        Role::BusinessOwner,
        Role::Manager,
        Role::Warehouse,
        Role::Dispatcher,
        Role::Sales,
        Role::CustomerService,
        Role::Driver,
        Role::Customer,
        Role::Anonymous,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::InfrastructureOwner => "infrastructure_owner",
            Role::BusinessOwner => "business_owner",
            Role::Manager => "manager",
            Role::Warehouse => "warehouse",
            Role::Dispatcher => "dispatcher",
            Role::Sales => "sales",
            Role::CustomerService => "customer_service",
            Role::Driver => "driver",
            Role::Customer => "customer",
            Role::Anonymous => "anonymous",
        }
    }

    fn index(self) -> usize { self as usize }

    /// Platform and business owners.
    pub fn is_admin(self) -> bool {
        match self {
            Role::InfrastructureOwner | Role::BusinessOwner => true,
            Role::Manager
            | Role::Warehouse
            | Role::Dispatcher
            | Role::Sales
            | Role::CustomerService
            | Role::Driver
            | Role::Customer
            | Role::Anonymous => false,
        }
    }

    /// Staff operating inside a business back office.
    pub fn is_business(self) -> bool {
        match self {
            Role::BusinessOwner
            | Role::Manager
            | Role::Warehouse
            | Role::Dispatcher
            | Role::Sales
            | Role::CustomerService => true,
            Role::InfrastructureOwner | Role::Driver | Role::Customer | Role::Anonymous => false,
        }
    }

    pub fn is_driver(self) -> bool {
        match self {
            Role::Driver => true,
            Role::InfrastructureOwner
            | Role::BusinessOwner
            | Role::Manager
            | Role::Warehouse
            | Role::Dispatcher
            | Role::Sales
            | Role::CustomerService
            | Role::Customer
            | Role::Anonymous => false,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
    type Err = AccessError;

    /// Accepts `business_owner`, `business-owner` and `Business_Owner` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase().replace('-', "_");
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == tag)
            .ok_or_else(|| AccessError::UnknownRole { tag: s.trim().to_string() })
    }
}

/// A route path (`/business/team`) or path prefix (`/business/*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoutePattern {
    Exact(String),
    Prefix(String),
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_suffix("/*") {
            Some(prefix) => RoutePattern::Prefix(prefix.to_string()),
            None => RoutePattern::Exact(raw.to_string()),
        }
    }

    /// Exact patterns compare whole paths. Prefix patterns match the prefix itself
    /// and anything below it on a segment boundary: `/business/*` covers
    /// `/business`, `/business/` and `/business/orders` but not `/businessX`.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(p) => p == path,
            RoutePattern::Prefix(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

impl From<String> for RoutePattern {
    fn from(s: String) -> Self { RoutePattern::parse(&s) }
}

impl From<RoutePattern> for String {
    fn from(p: RoutePattern) -> Self {
        match p {
            RoutePattern::Exact(s) => s,
            RoutePattern::Prefix(s) => format!("{}/*", s),
        }
    }
}

impl Display for RoutePattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutePattern::Exact(s) => f.write_str(s),
            RoutePattern::Prefix(s) => write!(f, "{}/*", s),
        }
    }
}

/// One entry of a capability list: the wildcard or a single named token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Grant {
    All,
    Named(String),
}

impl Grant {
    pub fn covers(&self, token: &str) -> bool {
        match self {
            Grant::All => true,
            Grant::Named(name) => name == token,
        }
    }
}

impl From<String> for Grant {
    fn from(s: String) -> Self { if s == ALL_TOKEN { Grant::All } else { Grant::Named(s) } }
}

impl From<&str> for Grant {
    fn from(s: &str) -> Self { Grant::from(s.to_string()) }
}

impl From<Grant> for String {
    fn from(g: Grant) -> Self {
        match g {
            Grant::All => ALL_TOKEN.to_string(),
            Grant::Named(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub can_access: Vec<RoutePattern>,
    #[serde(default)]
    pub cannot_access: Vec<RoutePattern>,
    #[serde(default)]
    pub can_view: Vec<Grant>,
    #[serde(default)]
    pub can_edit: Vec<Grant>,
    #[serde(default)]
    pub can_create: Vec<Grant>,
    #[serde(default)]
    pub can_delete: Vec<Grant>,
    #[serde(default)]
    pub actions: Vec<Grant>,
}

fn patterns(raw: &[&str]) -> Vec<RoutePattern> { raw.iter().map(|s| RoutePattern::parse(s)).collect() }
fn grants(raw: &[&str]) -> Vec<Grant> { raw.iter().map(|s| Grant::from(*s)).collect() }

impl PermissionSet {
    fn allow(mut self, raw: &[&str]) -> Self { self.can_access = patterns(raw); self }
    fn deny(mut self, raw: &[&str]) -> Self { self.cannot_access = patterns(raw); self }
    fn view(mut self, raw: &[&str]) -> Self { self.can_view = grants(raw); self }
    fn edit(mut self, raw: &[&str]) -> Self { self.can_edit = grants(raw); self }
    fn create(mut self, raw: &[&str]) -> Self { self.can_create = grants(raw); self }
    fn delete(mut self, raw: &[&str]) -> Self { self.can_delete = grants(raw); self }
    fn actions(mut self, raw: &[&str]) -> Self { self.actions = grants(raw); self }
}

fn builtin_permissions(role: Role) -> PermissionSet {
    let base = PermissionSet::default();
    match role {
        Role::InfrastructureOwner => base
            .allow(&["/*"])
            .view(&["all"]).edit(&["all"]).create(&["all"]).delete(&["all"])
            .actions(&["all"]),
        Role::BusinessOwner => base
            .allow(&["/business/*", "/store/*", "/account/*"])
            .deny(&["/infrastructure/*"])
            .view(&["all"]).edit(&["all"]).create(&["all"]).delete(&["all"])
            .actions(&[
                "manage_team", "assign_roles", "manage_billing", "view_reports", "adjust_stock",
                "assign_delivery", "apply_discount", "issue_refund", "export_data",
            ]),
        Role::Manager => base
            .allow(&["/business/*", "/account/*"])
            .deny(&["/business/billing/*", "/business/settings/*", "/business/team/roles"])
            .view(&["all"])
            .edit(&["products", "inventory", "orders", "deliveries", "customers", "team"])
            .create(&["products", "orders", "deliveries"])
            .delete(&["products"])
            .actions(&["manage_team", "view_reports", "adjust_stock", "assign_delivery", "apply_discount", "issue_refund"]),
        Role::Warehouse => base
            .allow(&["/business/inventory", "/business/incoming", "/business/restock", "/business/warehouse", "/business/dashboard"])
            .deny(&["/business/team", "/business/billing/*", "/business/settings/*", "/business/sales/*"])
            .view(&["products", "inventory", "orders", "suppliers"])
            .edit(&["inventory"])
            .create(&["restock_requests"])
            .actions(&["adjust_stock", "receive_shipment", "request_restock"]),
        Role::Dispatcher => base
            .allow(&["/business/dispatch/*", "/business/deliveries/*", "/business/drivers", "/business/dashboard"])
            .deny(&["/business/team", "/business/billing/*", "/business/settings/*"])
            .view(&["orders", "deliveries", "drivers", "routes"])
            .edit(&["deliveries", "routes"])
            .create(&["deliveries", "routes"])
            .actions(&["assign_delivery", "track_fleet", "reroute_delivery"]),
        Role::Sales => base
            .allow(&["/business/sales/*", "/business/customers/*", "/business/orders/*", "/business/dashboard"])
            .deny(&["/business/team", "/business/billing/*", "/business/orders/refunds"])
            .view(&["products", "customers", "orders", "quotes"])
            .edit(&["customers", "quotes"])
            .create(&["customers", "orders", "quotes"])
            .actions(&["create_quote", "apply_discount"]),
        Role::CustomerService => base
            .allow(&["/business/support/*", "/business/customers/*", "/business/orders/*", "/business/dashboard"])
            .deny(&["/business/team", "/business/billing/*", "/business/customers/export"])
            .view(&["customers", "orders", "tickets", "deliveries"])
            .edit(&["tickets", "customers"])
            .create(&["tickets"])
            .actions(&["respond_ticket", "issue_refund"]),
        Role::Driver => base
            .allow(&["/driver/*", "/account/*"])
            .deny(&["/driver/payouts/settings"])
            .view(&["deliveries", "routes", "payouts"])
            .edit(&["deliveries"])
            .actions(&["update_delivery_status", "view_earnings"]),
        Role::Customer => base
            .allow(&["/", "/store/*", "/account/*", "/orders/*", "/cart", "/checkout"])
            .deny(&["/store/admin/*", "/account/roles"])
            .view(&["products", "orders", "profile"])
            .edit(&["profile", "cart"])
            .create(&["orders", "reviews"])
            .delete(&["cart"])
            .actions(&["place_order", "cancel_order", "write_review"]),
        Role::Anonymous => base
            .allow(&["/", "/store/*", "/auth/*", "/login", "/register"])
            .deny(&["/store/checkout", "/store/admin/*"])
            .view(&["products"]),
    }
}

/// JSON shape accepted by [`PermissionCatalog::from_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub public_routes: Option<Vec<RoutePattern>>,
    pub roles: BTreeMap<String, PermissionSet>,
}

/// Immutable Role -> PermissionSet table; `sets` is aligned with `Role::ALL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCatalog {
    sets: Vec<PermissionSet>,
    public: Vec<RoutePattern>,
}

static BUILTIN: Lazy<PermissionCatalog> = Lazy::new(PermissionCatalog::builtin);

/// Shared built-in catalog.
pub fn builtin_catalog() -> &'static PermissionCatalog { &BUILTIN }

impl PermissionCatalog {
    pub fn builtin() -> Self {
        Self { sets: Role::ALL.iter().map(|r| builtin_permissions(*r)).collect(), public: patterns(PUBLIC_ROUTES) }
    }

    /// Total lookup: every role has an entry.
    pub fn get(&self, role: Role) -> &PermissionSet { &self.sets[role.index()] }

    /// Lookup by external role tag; unknown tags are reported, never panicked on.
    pub fn lookup(&self, tag: &str) -> AccessResult<&PermissionSet> {
        let role = Role::from_str(tag)?;
        Ok(self.get(role))
    }

    pub fn public_routes(&self) -> &[RoutePattern] { &self.public }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &PermissionSet)> {
        Role::ALL.iter().copied().zip(self.sets.iter())
    }

    /// Build from a JSON document. Every role must be present exactly once and
    /// every tag must name a known role.
    pub fn from_json(text: &str) -> AccessResult<Self> {
        let doc: CatalogDocument = serde_json::from_str(text)
            .map_err(|e| AccessError::config("catalog_parse", e.to_string()))?;
        let mut slots: Vec<Option<PermissionSet>> = vec![None; Role::ALL.len()];
        for (tag, set) in doc.roles.into_iter() {
            let role = Role::from_str(&tag)?;
            if slots[role.index()].is_some() {
                return Err(AccessError::config("catalog_duplicate_role", format!("role '{}' defined more than once", role)));
            }
            slots[role.index()] = Some(set);
        }
        let mut sets = Vec::with_capacity(slots.len());
        for (role, slot) in Role::ALL.iter().zip(slots.into_iter()) {
            match slot {
                Some(set) => sets.push(set),
                None => return Err(AccessError::config("catalog_incomplete", format!("catalog has no entry for role '{}'", role))),
            }
        }
        let public = doc.public_routes.unwrap_or_else(|| patterns(PUBLIC_ROUTES));
        Ok(Self { sets, public })
    }

    pub fn load(path: &Path) -> AccessResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AccessError::config("catalog_read", format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument {
            public_routes: Some(self.public.clone()),
            roles: self.iter().map(|(r, s)| (r.as_str().to_string(), s.clone())).collect(),
        }
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self { Self::builtin() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_total() {
        let cat = PermissionCatalog::builtin();
        for role in Role::ALL {
            let _ = cat.get(role);
            assert!(cat.lookup(role.as_str()).is_ok());
        }
        assert_eq!(cat.iter().count(), Role::ALL.len());
    }

    #[test]
    fn role_indices_follow_declaration_order() {
        for (i, role) in Role::ALL.iter().enumerate() {
            assert_eq!(role.index(), i);
        }
    }

    #[test]
    fn unknown_tag_is_an_error_not_a_panic() {
        let cat = PermissionCatalog::builtin();
        match cat.lookup("pilot") {
            Err(AccessError::UnknownRole { tag }) => assert_eq!(tag, "pilot"),
            other => panic!("expected UnknownRole, got {:?}", other),
        }
    }

    #[test]
    fn role_tags_parse_leniently() {
        assert_eq!("business-owner".parse::<Role>().unwrap(), Role::BusinessOwner);
        assert_eq!(" Customer_Service ".parse::<Role>().unwrap(), Role::CustomerService);
        assert_eq!(Role::Driver.to_string(), "driver");
        let v = serde_json::to_value(Role::InfrastructureOwner).unwrap();
        assert_eq!(v, "infrastructure_owner");
    }

    #[test]
    fn prefix_pattern_respects_segment_boundary() {
        let p = RoutePattern::parse("/business/*");
        assert!(p.matches("/business"));
        assert!(p.matches("/business/"));
        assert!(p.matches("/business/orders"));
        assert!(p.matches("/business/orders/42/edit"));
        assert!(!p.matches("/businessX"));
        assert!(!p.matches("/Business/orders"));
    }

    #[test]
    fn exact_pattern_requires_equality() {
        let p = RoutePattern::parse("/business/team");
        assert!(p.matches("/business/team"));
        assert!(!p.matches("/business/team/edit"));
        assert!(!p.matches("/business/team/"));
    }

    #[test]
    fn root_wildcard_matches_everything_rooted() {
        let p = RoutePattern::parse("/*");
        assert!(p.matches("/"));
        assert!(p.matches("/infrastructure/nodes"));
    }

    #[test]
    fn grant_strings_roundtrip_through_serde() {
        let g: Vec<Grant> = serde_json::from_str(r#"["all", "orders"]"#).unwrap();
        assert_eq!(g, vec![Grant::All, Grant::Named("orders".into())]);
        assert_eq!(serde_json::to_string(&g).unwrap(), r#"["all","orders"]"#);
        let p: RoutePattern = serde_json::from_str(r#""/driver/*""#).unwrap();
        assert_eq!(p, RoutePattern::Prefix("/driver".into()));
        assert_eq!(p.to_string(), "/driver/*");
    }

    #[test]
    fn predicates_classify_roles() {
        assert!(Role::InfrastructureOwner.is_admin());
        assert!(Role::BusinessOwner.is_admin() && Role::BusinessOwner.is_business());
        assert!(Role::Warehouse.is_business() && !Role::Warehouse.is_admin());
        assert!(Role::Driver.is_driver() && !Role::Driver.is_business());
        assert!(!Role::Customer.is_admin() && !Role::Anonymous.is_business());
    }

    #[test]
    fn json_document_roundtrips_builtin() {
        let cat = PermissionCatalog::builtin();
        let text = serde_json::to_string(&cat.to_document()).unwrap();
        let back = PermissionCatalog::from_json(&text).unwrap();
        assert_eq!(back, cat);
    }

    #[test]
    fn json_catalog_must_be_total() {
        let text = r#"{ "roles": { "driver": { "can_access": ["/driver/*"] } } }"#;
        let err = PermissionCatalog::from_json(text).unwrap_err();
        assert_eq!(err.code_str(), "catalog_incomplete");
    }

    #[test]
    fn json_catalog_rejects_unknown_roles() {
        let mut doc = PermissionCatalog::builtin().to_document();
        doc.roles.insert("pilot".into(), PermissionSet::default());
        let err = PermissionCatalog::from_json(&serde_json::to_string(&doc).unwrap()).unwrap_err();
        assert!(matches!(err, AccessError::UnknownRole { .. }));
    }

    #[test]
    fn json_catalog_rejects_aliased_duplicates() {
        let mut doc = PermissionCatalog::builtin().to_document();
        doc.roles.insert("business-owner".into(), PermissionSet::default());
        let err = PermissionCatalog::from_json(&serde_json::to_string(&doc).unwrap()).unwrap_err();
        assert_eq!(err.code_str(), "catalog_duplicate_role");
    }
}
