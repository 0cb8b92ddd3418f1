use rusqlite::Connection;
use vendor_registry_core::db::migrations::{
    current_version, latest_version, migrate_to, MigrationDirection,
};
use vendor_registry_core::db::{open_db, open_db_in_memory, open_db_unmigrated, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert!(object_exists(&conn, "table", "vendor_extractors"));
    assert!(object_exists(&conn, "index", "idx_vendor_name_lower"));
    assert!(object_exists(&conn, "index", "idx_vendor_status"));
    assert!(!object_exists(&conn, "index", "idx_vendor_name"));
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vendors.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert!(object_exists(&conn_second, "table", "vendor_extractors"));
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn open_db_unmigrated_leaves_schema_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.db");

    let conn = open_db_unmigrated(&path).unwrap();
    assert_eq!(schema_version(&conn), 0);
    assert!(!object_exists(&conn, "table", "vendor_extractors"));
}

#[test]
fn migrate_to_walks_up_and_back_down_one_step_at_a_time() {
    let mut conn = Connection::open_in_memory().unwrap();

    let up = migrate_to(&mut conn, latest_version()).unwrap();
    assert_eq!(up.from_version, 0);
    assert_eq!(up.to_version, 2);
    let steps: Vec<(u32, MigrationDirection)> =
        up.applied.iter().map(|m| (m.version, m.direction)).collect();
    assert_eq!(
        steps,
        vec![(1, MigrationDirection::Up), (2, MigrationDirection::Up)]
    );

    let down = migrate_to(&mut conn, 0).unwrap();
    let steps: Vec<(u32, MigrationDirection)> =
        down.applied.iter().map(|m| (m.version, m.direction)).collect();
    assert_eq!(
        steps,
        vec![(2, MigrationDirection::Down), (1, MigrationDirection::Down)]
    );
    assert_eq!(current_version(&conn).unwrap(), 0);
    assert!(!object_exists(&conn, "table", "vendor_extractors"));
}

#[test]
fn migrate_to_current_version_is_noop() {
    let mut conn = open_db_in_memory().unwrap();
    let report = migrate_to(&mut conn, latest_version()).unwrap();
    assert!(report.is_noop());
    assert_eq!(report.from_version, report.to_version);
}

#[test]
fn migrate_to_rejects_unknown_target() {
    let mut conn = open_db_in_memory().unwrap();
    let err = migrate_to(&mut conn, latest_version() + 1).unwrap_err();
    assert!(matches!(
        err,
        DbError::UnknownMigrationTarget { target, .. } if target == latest_version() + 1
    ));
    assert_eq!(schema_version(&conn), latest_version());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn object_exists(conn: &Connection, kind: &str, name: &str) -> bool {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            );",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap();
    exists == 1
}
