use std::sync::Arc;

use podbase::server::{CreateSpec, Permission, PermissionCheck, SUBJECT_HEADER};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test]
fn test_permission_strings() {
    assert_eq!(Permission::Read.as_str(), "dbaas:read");
    assert_eq!(Permission::Write.as_str(), "dbaas:write");
    assert_eq!(SUBJECT_HEADER, "x-dbaas-subject");
}

#[test]
fn test_permission_predicate_can_scope_by_subject() {
    // A host predicate granting writes to one operator and reads to all.
    let check: PermissionCheck = Arc::new(|permission, subject| match permission {
        Permission::Read => true,
        Permission::Write => subject == "operator",
    });

    assert!(check(Permission::Read, "anyone"));
    assert!(check(Permission::Write, "operator"));
    assert!(!check(Permission::Write, "intruder"));
    assert!(!check(Permission::Write, ""));
}

#[test]
fn test_create_spec_minimal_body_uses_defaults() {
    let spec: CreateSpec = serde_json::from_str(r#"{"engine": "postgresql"}"#).unwrap();
    assert_eq!(spec.engine, "postgresql");
    assert_eq!(spec.database_name, "app");
    assert_eq!(spec.sku, "d2");
    assert!(!spec.external_access);
    assert!(!spec.tls_enabled);
    assert!(spec.name.is_none());
    assert!(spec.vnet_name.is_none());
}

#[test]
fn test_create_spec_full_body() {
    let body = r#"{
        "engine": "redis",
        "name": "cache-01",
        "database_name": "0",
        "sku": "custom",
        "memory_limit_mb": 2048,
        "cpu_limit": 1.5,
        "storage_limit_gb": 20,
        "external_access": true,
        "vnet_name": "podbase0"
    }"#;
    let spec: CreateSpec = serde_json::from_str(body).unwrap();
    assert_eq!(spec.name.as_deref(), Some("cache-01"));
    assert_eq!(spec.sku, "custom");
    assert_eq!(spec.memory_limit_mb, Some(2048));
    assert_eq!(spec.cpu_limit, Some(1.5));
    assert!(spec.external_access);
    assert_eq!(spec.vnet_name.as_deref(), Some("podbase0"));
}

#[test]
fn test_create_spec_rejects_missing_engine() {
    assert!(serde_json::from_str::<CreateSpec>(r#"{"name": "x"}"#).is_err());
}
