use rusqlite::Connection;
use vendor_registry_core::db::{open_configured, open_db, open_db_in_memory};
use vendor_registry_core::{
    RegistryConfig, RegistryError, SqliteVendorRepository, VendorListQuery, VendorNameError, VendorRegistry,
    VendorStatus,
};

fn registry(conn: &Connection) -> VendorRegistry<SqliteVendorRepository<'_>> {
    VendorRegistry::with_client(SqliteVendorRepository::new(conn), "test")
}

#[test]
fn case_variants_of_a_registered_name_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("NewCorp").unwrap();

    for variant in ["newcorp", "NEWCORP", "  nEwCoRp  "] {
        let err = registry.register(variant).unwrap_err();
        match err {
            RegistryError::DuplicateName {
                normalized_name,
                existing_id,
            } => {
                assert_eq!(normalized_name, "newcorp");
                assert_eq!(existing_id, Some(id));
            }
            other => panic!("unexpected error for {variant}: {other}"),
        }
    }

    assert_eq!(registry.list(&VendorListQuery::default()).unwrap().len(), 1);
}

#[test]
fn duplicate_error_reports_only_the_normalized_name() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    registry.register("NewCorp").unwrap();
    let message = registry.register("NEWCORP").unwrap_err().to_string();

    assert!(message.contains("newcorp"));
    assert!(!message.contains("NewCorp"));
    assert!(!message.contains("NEWCORP"));
}

#[test]
fn distinct_names_register_independently() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let first = registry.register("NewCorp").unwrap();
    let second = registry.register("DifferentCorp").unwrap();
    assert_ne!(first, second);

    let vendor = registry.get(second).unwrap().unwrap();
    assert_eq!(vendor.name.as_str(), "DifferentCorp");
    assert_eq!(vendor.status, VendorStatus::Broken);
    assert_eq!(vendor.version, 1);
    assert_eq!(vendor.created_by, "test");
}

#[test]
fn blank_names_are_rejected_before_storage() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    for blank in ["", "   ", "\t"] {
        let err = registry.register(blank).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InvalidName(VendorNameError::Empty)
        ));
    }

    let err = registry.register("Acme@Corp").unwrap_err();
    assert!(matches!(
        err,
        RegistryError::InvalidName(VendorNameError::InvalidCharacters)
    ));

    assert!(registry.list(&VendorListQuery::default()).unwrap().is_empty());
}

#[test]
fn register_stores_trimmed_display_name() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("  Acme Corp ").unwrap();
    let vendor = registry.get(id).unwrap().unwrap();
    assert_eq!(vendor.name.as_str(), "Acme Corp");
}

#[test]
fn rename_onto_another_vendors_name_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let acme = registry.register("Acme").unwrap();
    let beta = registry.register("Beta").unwrap();

    let err = registry.rename(acme, "beta").unwrap_err();
    match err {
        RegistryError::DuplicateName {
            normalized_name,
            existing_id,
        } => {
            assert_eq!(normalized_name, "beta");
            assert_eq!(existing_id, Some(beta));
        }
        other => panic!("unexpected error: {other}"),
    }

    let unchanged = registry.get(acme).unwrap().unwrap();
    assert_eq!(unchanged.name.as_str(), "Acme");
    assert_eq!(unchanged.version, 1);
}

#[test]
fn rename_to_own_name_in_other_casing_succeeds() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("Acme").unwrap();

    let renamed = registry.rename(id, "ACME").unwrap();
    assert_eq!(renamed.name.as_str(), "ACME");
    assert_eq!(renamed.name.normalized(), "acme");
    assert_eq!(renamed.version, 2);

    assert_eq!(registry.lookup("acme").unwrap(), Some(id));
}

#[test]
fn rename_to_identical_name_is_a_noop() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("Acme").unwrap();
    let before = registry.get(id).unwrap().unwrap();

    let after = registry.rename(id, " Acme ").unwrap();
    assert_eq!(after, before);
}

#[test]
fn rename_frees_the_previous_name() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("OldName").unwrap();
    registry.rename(id, "NewName").unwrap();

    assert_eq!(registry.lookup("oldname").unwrap(), None);
    assert_eq!(registry.lookup("NEWNAME").unwrap(), Some(id));
    registry.register("oldname").unwrap();
}

#[test]
fn rename_missing_vendor_returns_not_found() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let missing = uuid::Uuid::new_v4();
    let err = registry.rename(missing, "Anything").unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(id) if id == missing));
}

#[test]
fn lookup_is_case_insensitive() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("NewCorp").unwrap();
    for query in ["NewCorp", "newcorp", "NEWCORP", " newCorp "] {
        assert_eq!(registry.lookup(query).unwrap(), Some(id), "query {query}");
    }

    assert_eq!(registry.lookup("OtherCorp").unwrap(), None);
}

#[test]
fn lookup_rejects_blank_input() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let err = registry.lookup("  ").unwrap_err();
    assert!(matches!(
        err,
        RegistryError::InvalidName(VendorNameError::Empty)
    ));
}

#[test]
fn name_lookup_is_served_by_functional_index() {
    let conn = open_db_in_memory().unwrap();

    let mut stmt = conn
        .prepare("EXPLAIN QUERY PLAN SELECT id FROM vendor_extractors WHERE lower(name) = ?1;")
        .unwrap();
    let plan: Vec<String> = stmt
        .query_map(["newcorp"], |row| row.get::<_, String>(3))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    let plan = plan.join("\n");
    assert!(plan.contains("idx_vendor_name_lower"), "plan: {plan}");
    assert!(!plan.contains("SCAN vendor_extractors"), "plan: {plan}");
}

#[test]
fn delete_frees_the_normalized_name() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("Gone").unwrap();
    registry.delete(id).unwrap();

    assert!(registry.get(id).unwrap().is_none());
    let reused = registry.register("GONE").unwrap();
    assert_ne!(reused, id);

    let err = registry.delete(id).unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(missing) if missing == id));
}

#[test]
fn update_status_uses_optimistic_locking() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let id = registry.register("Acme").unwrap();

    let updated = registry
        .update_status(id, 1, VendorStatus::Operational)
        .unwrap();
    assert_eq!(updated.status, VendorStatus::Operational);
    assert_eq!(updated.version, 2);

    let err = registry
        .update_status(id, 1, VendorStatus::Broken)
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::VersionConflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));
    assert_eq!(
        registry.get(id).unwrap().unwrap().status,
        VendorStatus::Operational
    );
}

#[test]
fn list_orders_by_normalized_name_and_filters_status() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry(&conn);

    let charlie = registry.register("charlie").unwrap();
    registry.register("Alpha").unwrap();
    registry.register("bravo").unwrap();
    registry
        .update_status(charlie, 1, VendorStatus::Operational)
        .unwrap();

    let names: Vec<String> = registry
        .list(&VendorListQuery::default())
        .unwrap()
        .into_iter()
        .map(|vendor| vendor.name.to_string())
        .collect();
    assert_eq!(names, vec!["Alpha", "bravo", "charlie"]);

    let operational = registry
        .list(&VendorListQuery {
            status: Some(VendorStatus::Operational),
            ..VendorListQuery::default()
        })
        .unwrap();
    assert_eq!(operational.len(), 1);
    assert_eq!(operational[0].id, charlie);

    let paged = registry
        .list(&VendorListQuery {
            limit: Some(1),
            offset: 1,
            ..VendorListQuery::default()
        })
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].name.as_str(), "bravo");
}

#[test]
fn storage_failures_are_not_reported_as_duplicates() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch("DROP TABLE vendor_extractors;").unwrap();
    let registry = registry(&conn);

    let err = registry.register("Acme").unwrap_err();
    assert!(matches!(err, RegistryError::Storage(_)), "got {err}");
    assert!(!err.is_storage_unavailable());
}

#[test]
fn write_lock_contention_is_reported_as_retryable_storage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vendors.db");
    let holder = open_db(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let config = RegistryConfig {
        db_path: path.clone(),
        busy_timeout_ms: 50,
        ..RegistryConfig::default()
    };
    let conn = open_configured(&config, true).unwrap();
    let registry = registry(&conn);

    let err = registry.register("Acme").unwrap_err();
    assert!(matches!(err, RegistryError::Storage(_)), "got {err}");
    assert!(err.is_storage_unavailable(), "got {err}");

    holder.execute_batch("ROLLBACK;").unwrap();
    registry.register("Acme").unwrap();
}

#[test]
fn invalid_persisted_rows_are_rejected_on_read() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO vendor_extractors (id, name, status, created_by)
         VALUES ('not-a-uuid', 'Broken Row', 'broken', 'test');",
        [],
    )
    .unwrap();
    let registry = registry(&conn);

    let err = registry.lookup("broken row").unwrap_err();
    assert!(matches!(err, RegistryError::InvalidData(_)));
}
