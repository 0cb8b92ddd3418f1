//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Move a database up or down to a target version atomically.
//! - Refuse migrations whose preflight finds rows that would block them.
//!
//! # Invariants
//! - `version` values are contiguous from 1, so reverting migration `n`
//!   leaves the database at `n - 1`.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A failed plan leaves no partial schema change behind.

use crate::db::name_index::{self, DuplicateNameGroup};
use crate::db::{DbError, DbResult, MigrationPreconditionError};
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Instant;

type Preflight = fn(&Connection) -> DbResult<Vec<DuplicateNameGroup>>;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    up: &'static str,
    down: &'static str,
    /// Returns rows that would make `up` fail; empty means safe to run.
    preflight: Option<Preflight>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        up: include_str!("0001_init.sql"),
        down: include_str!("0001_init.down.sql"),
        preflight: None,
    },
    Migration {
        version: 2,
        name: "vendor_name_lower",
        up: include_str!("0002_vendor_name_lower.sql"),
        down: include_str!("0002_vendor_name_lower.down.sql"),
        preflight: Some(name_index::scan_duplicate_names),
    },
];

/// Direction a migration step was executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    Down,
}

impl MigrationDirection {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// One executed migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: &'static str,
    pub direction: MigrationDirection,
}

/// Outcome of a successful `migrate_to` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Steps in execution order; empty when already at target.
    pub applied: Vec<AppliedMigration>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }

    fn unchanged(version: u32) -> Self {
        Self {
            from_version: version,
            to_version: version,
            applied: Vec::new(),
        }
    }
}

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Reads the schema version recorded in `PRAGMA user_version`.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current = current_version(conn)?;
    let latest = latest_version();

    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }

    if current == latest {
        return Ok(());
    }

    migrate_to(conn, latest).map(|_| ())
}

/// Moves the schema to `target`, applying or reverting migrations one by one.
///
/// All steps share one IMMEDIATE transaction. When a step fails the whole
/// plan is rolled back and the database stays at its starting version.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the database is newer than this binary.
/// - `UnknownMigrationTarget` when `target` exceeds the latest version.
/// - `MigrationPrecondition` when a preflight finds blocking rows.
pub fn migrate_to(conn: &mut Connection, target: u32) -> DbResult<MigrationReport> {
    let current = current_version(conn)?;
    let latest = latest_version();

    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }
    if target > latest {
        return Err(DbError::UnknownMigrationTarget {
            target,
            latest_supported: latest,
        });
    }
    if current == target {
        return Ok(MigrationReport::unchanged(current));
    }

    let steps: Vec<(&Migration, MigrationDirection)> = if target > current {
        MIGRATIONS
            .iter()
            .filter(|m| m.version > current && m.version <= target)
            .map(|m| (m, MigrationDirection::Up))
            .collect()
    } else {
        MIGRATIONS
            .iter()
            .rev()
            .filter(|m| m.version <= current && m.version > target)
            .map(|m| (m, MigrationDirection::Down))
            .collect()
    };

    execute_plan(conn, &steps, current, target)
}

/// Re-runs one migration's statements without changing the recorded version.
///
/// Used when `user_version` says a migration is done but the live schema
/// disagrees. Every migration statement is idempotent, so this is safe.
pub(crate) fn reapply(
    conn: &mut Connection,
    version: u32,
    direction: MigrationDirection,
) -> DbResult<()> {
    let Some(migration) = MIGRATIONS.iter().find(|m| m.version == version) else {
        return Err(DbError::UnknownMigrationTarget {
            target: version,
            latest_supported: latest_version(),
        });
    };

    let current = current_version(conn)?;
    execute_plan(conn, &[(migration, direction)], current, current).map(|_| ())
}

enum StepFailure {
    Db(DbError),
    Blocked {
        version: u32,
        duplicates: Vec<DuplicateNameGroup>,
        storage_error: Option<rusqlite::Error>,
    },
}

impl From<rusqlite::Error> for StepFailure {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<DbError> for StepFailure {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

fn execute_plan(
    conn: &mut Connection,
    steps: &[(&Migration, MigrationDirection)],
    from: u32,
    to: u32,
) -> DbResult<MigrationReport> {
    let started_at = Instant::now();
    info!(
        "event=db_migrate module=db status=start from={} to={} steps={}",
        from,
        to,
        steps.len()
    );

    match run_steps(conn, steps, to) {
        Ok(()) => {
            info!(
                "event=db_migrate module=db status=ok from={} to={} duration_ms={}",
                from,
                to,
                started_at.elapsed().as_millis()
            );
            Ok(MigrationReport {
                from_version: from,
                to_version: to,
                applied: steps
                    .iter()
                    .map(|(migration, direction)| AppliedMigration {
                        version: migration.version,
                        name: migration.name,
                        direction: *direction,
                    })
                    .collect(),
            })
        }
        Err(StepFailure::Db(err)) => {
            error!(
                "event=db_migrate module=db status=error from={} to={} duration_ms={} error_code=migration_failed error={}",
                from,
                to,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
        Err(StepFailure::Blocked {
            version,
            duplicates,
            storage_error,
        }) => {
            // The transaction is gone by now; report what is actually live.
            let enforcement = name_index::enforcement_state(conn)?;
            error!(
                "event=db_migrate module=db status=error from={} to={} duration_ms={} error_code=migration_precondition version={} duplicate_groups={} enforcement={}",
                from,
                to,
                started_at.elapsed().as_millis(),
                version,
                duplicates.len(),
                enforcement
            );
            Err(MigrationPreconditionError {
                version,
                duplicates,
                enforcement,
                storage_error,
            }
            .into())
        }
    }
}

fn run_steps(
    conn: &mut Connection,
    steps: &[(&Migration, MigrationDirection)],
    to: u32,
) -> Result<(), StepFailure> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    for (migration, direction) in steps {
        match direction {
            MigrationDirection::Up => run_up(&tx, migration)?,
            MigrationDirection::Down => tx.execute_batch(migration.down)?,
        }
        info!(
            "event=db_migrate_step module=db status=ok version={} name={} direction={}",
            migration.version,
            migration.name,
            direction.as_str()
        );
    }

    tx.execute_batch(&format!("PRAGMA user_version = {to};"))?;
    tx.commit()?;
    Ok(())
}

fn run_up(conn: &Connection, migration: &Migration) -> Result<(), StepFailure> {
    let Some(preflight) = migration.preflight else {
        conn.execute_batch(migration.up)?;
        return Ok(());
    };

    let duplicates = preflight(conn)?;
    if !duplicates.is_empty() {
        return Err(StepFailure::Blocked {
            version: migration.version,
            duplicates,
            storage_error: None,
        });
    }

    // Reached only when the preflight and the index disagree on what collides;
    // the IMMEDIATE transaction keeps other writers out in between.
    match conn.execute_batch(migration.up) {
        Ok(()) => Ok(()),
        Err(err) if name_index::is_unique_violation(&err) => Err(StepFailure::Blocked {
            version: migration.version,
            duplicates: preflight(conn)?,
            storage_error: Some(err),
        }),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        current_version, execute_plan, latest_version, migrate_to, Migration,
        MigrationDirection, MIGRATIONS,
    };
    use crate::db::name_index::EnforcementState;
    use crate::db::DbError;
    use rusqlite::Connection;

    #[test]
    fn versions_are_contiguous_from_one() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, index + 1);
        }
        assert_eq!(latest_version() as usize, MIGRATIONS.len());
    }

    #[test]
    fn every_migration_has_a_down_script() {
        assert!(MIGRATIONS.iter().all(|m| !m.down.trim().is_empty()));
    }

    #[test]
    fn index_build_rejection_is_reported_with_storage_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, 1).unwrap();
        conn.execute_batch(
            "INSERT INTO vendor_extractors (id, name, created_by) VALUES ('a', 'X', 'test');
             INSERT INTO vendor_extractors (id, name, created_by) VALUES ('b', 'x', 'test');",
        )
        .unwrap();

        let blind = Migration {
            preflight: Some(|_| Ok(Vec::new())),
            ..MIGRATIONS[1]
        };
        let err = execute_plan(&mut conn, &[(&blind, MigrationDirection::Up)], 1, 2).unwrap_err();

        let DbError::MigrationPrecondition(precondition) = err else {
            panic!("expected precondition error");
        };
        assert_eq!(precondition.version, 2);
        assert!(precondition.duplicates.is_empty());
        assert!(precondition.storage_error.is_some());
        assert_eq!(precondition.enforcement, EnforcementState::CaseSensitive);
        assert_eq!(current_version(&conn).unwrap(), 1);
    }
}
