//! End-to-end wiring: config -> Gate -> session hydration -> guarded routes -> audit log.

use anyhow::Result;
use tempfile::tempdir;

use rolegate::audit::AuditEvent;
use rolegate::{AccessError, Gate, GateConfig, Role};

fn read_audit(path: &std::path::Path) -> Result<Vec<AuditEvent>> {
    let text = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in text.lines() { out.push(serde_json::from_str(line)?); }
    Ok(out)
}

#[test]
fn session_hydrates_from_store_and_audits_denials() -> Result<()> {
    let tmp = tempdir()?;
    let audit = tmp.path().join("audit.jsonl");
    let cfg = GateConfig { data_dir: tmp.path().join("data"), audit_log: Some(audit.clone()), ..GateConfig::default() };
    let gate = Gate::open(&cfg)?;

    gate.assignments.assign("0xABC", Role::Warehouse, Some("0xowner"))?;
    assert_eq!(gate.access.hydrate(&gate.assignments, "0xabc")?, Some(Role::Warehouse));
    assert!(gate.access.can_access("/business/inventory", None));
    assert!(!gate.access.can_access("/business/team", None));
    assert!(matches!(gate.access.assert_access("/business/billing/plan", None), Err(AccessError::RouteDenied { .. })));

    // Unknown actor hydrates to unauthenticated.
    assert_eq!(gate.access.hydrate(&gate.assignments, "0x404")?, None);
    assert!(gate.access.can_access("/store/catalog", None));

    let events = read_audit(&audit)?;
    let names: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(names, vec!["assignment.granted", "role.set", "access.denied", "access.denied", "role.set"]);
    assert_eq!(events[2].get_str("path"), Some("/business/team"));
    assert_eq!(events[2].get_str("role"), Some("warehouse"));
    Ok(())
}

#[test]
fn revocation_demotes_on_next_hydrate() -> Result<()> {
    let tmp = tempdir()?;
    let gate = Gate::open(&GateConfig { data_dir: tmp.path().to_path_buf(), ..GateConfig::default() })?;
    gate.assignments.assign("0xabc", Role::Manager, None)?;
    gate.access.hydrate(&gate.assignments, "0xabc")?;
    assert!(gate.access.can_access("/business/orders", None));
    gate.assignments.revoke("0xabc", None)?;
    assert_eq!(gate.access.hydrate(&gate.assignments, "0xABC")?, Some(Role::Customer));
    assert!(!gate.access.can_access("/business/orders", None));
    assert!(gate.access.can_access("/cart", None));
    Ok(())
}

#[test]
fn catalog_file_overrides_builtin_table() -> Result<()> {
    let tmp = tempdir()?;
    let mut doc = rolegate::PermissionCatalog::builtin().to_document();
    if let Some(set) = doc.roles.get_mut("driver") {
        set.can_access.push(rolegate::catalog::RoutePattern::parse("/business/dashboard"));
    }
    let cat_path = tmp.path().join("catalog.json");
    std::fs::write(&cat_path, serde_json::to_string_pretty(&doc)?)?;
    let gate = Gate::open(&GateConfig { data_dir: tmp.path().join("data"), catalog_path: Some(cat_path), ..GateConfig::default() })?;
    assert!(gate.access.can_access("/business/dashboard", Some(Role::Driver)));
    assert!(!rolegate::catalog::builtin_catalog().get(Role::Driver).can_access.iter().any(|p| p.matches("/business/dashboard")));
    Ok(())
}
