//! Case-insensitive vendor name enforcement.
//!
//! # Responsibility
//! - Drive the operator-facing switch between exact-match and
//!   case-insensitive unique indexes on `vendor_extractors.name`.
//! - Scan for rows that would block the case-insensitive index.
//! - Report which enforcement is live, from the schema itself.
//!
//! # Invariants
//! - `upgrade` and `downgrade` are idempotent and may be re-run freely.
//! - Index swaps happen inside one transaction, so readers never observe a
//!   table without name enforcement after a committed step.
//! - Duplicates are reported, never merged or renamed automatically.

use crate::db::migrations::{
    current_version, migrate_to, reapply, MigrationDirection, MigrationReport,
};
use crate::db::{DbError, DbResult};
use log::{error, info, warn};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Legacy exact-match unique index.
pub const LEGACY_NAME_INDEX: &str = "idx_vendor_name";
/// Alternate name the legacy exact-match constraint has shipped under.
pub const LEGACY_NAME_CONSTRAINT: &str = "vendor_extractors_name_key";
/// Functional unique index over `lower(name)`.
pub const NAME_LOWER_INDEX: &str = "idx_vendor_name_lower";

/// Schema version whose live enforcement is the legacy exact-match index.
pub const CASE_SENSITIVE_VERSION: u32 = 1;
/// Schema version whose live enforcement is the `lower(name)` index.
pub const CASE_INSENSITIVE_VERSION: u32 = 2;

const VENDOR_TABLE: &str = "vendor_extractors";

/// Which unique index currently guards vendor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementState {
    /// Only an exact-match unique index on `name`.
    CaseSensitive,
    /// Only a unique index over the lower-cased name.
    CaseInsensitive,
    /// Both kinds are live at once.
    Overlapping,
    /// No unique index guards `name`.
    Unenforced,
}

impl EnforcementState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CaseSensitive => "case_sensitive",
            Self::CaseInsensitive => "case_insensitive",
            Self::Overlapping => "overlapping",
            Self::Unenforced => "unenforced",
        }
    }
}

impl Display for EnforcementState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored row taking part in a normalized-name collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateNameMember {
    /// Raw `id` column text, unparsed so malformed rows still surface.
    pub id: String,
    /// Display name exactly as stored.
    pub name: String,
    pub created_at: i64,
}

/// Rows sharing one normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateNameGroup {
    pub normalized_name: String,
    /// Oldest first.
    pub members: Vec<DuplicateNameMember>,
}

/// Switches name enforcement to the case-insensitive index.
///
/// Applies pending migrations up to [`CASE_INSENSITIVE_VERSION`]. If the
/// recorded version is already there but the live index is not, the
/// migration statements are re-run.
///
/// # Errors
/// - `MigrationPrecondition` when case-variant duplicates exist. Nothing is
///   changed; the error carries the colliding rows and live enforcement.
/// - `EnforcementNotReached` when an unmanaged unique index on `name` keeps
///   exact-match enforcement alive after the repair.
pub fn upgrade(conn: &mut Connection) -> DbResult<MigrationReport> {
    let current = current_version(conn)?;
    let report = migrate_to(conn, current.max(CASE_INSENSITIVE_VERSION))?;
    ensure_enforcement(conn, EnforcementState::CaseInsensitive, MigrationDirection::Up)?;
    Ok(report)
}

/// Restores the exact-match unique index on `name`.
///
/// Exact inverse of [`upgrade`]. Moving from a fresh database creates the
/// table in its case-sensitive shape.
///
/// # Errors
/// - `EnforcementNotReached` when an unmanaged folded unique index on `name`
///   survives the repair.
pub fn downgrade(conn: &mut Connection) -> DbResult<MigrationReport> {
    let report = migrate_to(conn, CASE_SENSITIVE_VERSION)?;
    ensure_enforcement(conn, EnforcementState::CaseSensitive, MigrationDirection::Down)?;
    Ok(report)
}

/// Re-runs the name index migration when live enforcement is not `expected`,
/// then checks again.
///
/// The migration only manages its own index names, so a hand-made unique
/// index can still leave the table `Overlapping`; that is an error, not `Ok`.
fn ensure_enforcement(
    conn: &mut Connection,
    expected: EnforcementState,
    direction: MigrationDirection,
) -> DbResult<()> {
    let state = enforcement_state(conn)?;
    if state == expected {
        return Ok(());
    }

    warn!(
        "event=name_index_repair module=db status=start direction={} enforcement={}",
        direction.as_str(),
        state
    );
    reapply(conn, CASE_INSENSITIVE_VERSION, direction)?;

    let repaired = enforcement_state(conn)?;
    if repaired != expected {
        error!(
            "event=name_index_repair module=db status=error direction={} enforcement={} expected={}",
            direction.as_str(),
            repaired,
            expected
        );
        return Err(DbError::EnforcementNotReached {
            expected,
            actual: repaired,
        });
    }

    info!(
        "event=name_index_repair module=db status=ok direction={}",
        direction.as_str()
    );
    Ok(())
}

/// Lists every group of rows whose names collide once lower-cased.
///
/// Returns an empty list when the vendor table does not exist yet.
pub fn scan_duplicate_names(conn: &Connection) -> DbResult<Vec<DuplicateNameGroup>> {
    if !vendor_table_exists(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT lower(name) AS normalized_name, id, name, created_at
         FROM vendor_extractors
         WHERE lower(name) IN (
             SELECT lower(name)
             FROM vendor_extractors
             GROUP BY lower(name)
             HAVING COUNT(*) > 1
         )
         ORDER BY normalized_name ASC, created_at ASC, id ASC;",
    )?;

    let mut rows = stmt.query([])?;
    let mut groups: Vec<DuplicateNameGroup> = Vec::new();
    while let Some(row) = rows.next()? {
        let normalized_name: String = row.get("normalized_name")?;
        let member = DuplicateNameMember {
            id: row.get("id")?,
            name: row.get("name")?,
            created_at: row.get("created_at")?,
        };

        match groups.last_mut() {
            Some(group) if group.normalized_name == normalized_name => group.members.push(member),
            _ => groups.push(DuplicateNameGroup {
                normalized_name,
                members: vec![member],
            }),
        }
    }

    Ok(groups)
}

/// Inspects live unique indexes on the vendor table.
pub fn enforcement_state(conn: &Connection) -> DbResult<EnforcementState> {
    let mut stmt = conn.prepare(
        "SELECT name
         FROM pragma_index_list(?1)
         WHERE \"unique\" = 1 AND origin <> 'pk';",
    )?;
    let index_names = stmt
        .query_map([VENDOR_TABLE], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut exact = false;
    let mut folded = false;
    for index_name in &index_names {
        match classify_index(conn, index_name)? {
            Some(NameKey::Exact) => exact = true,
            Some(NameKey::Folded) => folded = true,
            None => {}
        }
    }

    Ok(match (exact, folded) {
        (true, false) => EnforcementState::CaseSensitive,
        (false, true) => EnforcementState::CaseInsensitive,
        (true, true) => EnforcementState::Overlapping,
        (false, false) => EnforcementState::Unenforced,
    })
}

/// Returns whether `err` is a UNIQUE violation (as opposed to CHECK, NOT
/// NULL or a transport failure).
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Returns whether `err` is a UNIQUE violation raised by a vendor name index.
///
/// Column indexes report `vendor_extractors.name`; expression indexes report
/// the index name instead.
pub(crate) fn is_name_unique_violation(err: &rusqlite::Error) -> bool {
    if !is_unique_violation(err) {
        return false;
    }
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            message.contains("vendor_extractors.name") || message.contains(NAME_LOWER_INDEX)
        }
        _ => false,
    }
}

enum NameKey {
    Exact,
    Folded,
}

fn classify_index(conn: &Connection, index_name: &str) -> DbResult<Option<NameKey>> {
    let mut stmt = conn.prepare(
        "SELECT cid, name, coll
         FROM pragma_index_xinfo(?1)
         WHERE key = 1;",
    )?;
    let columns = stmt
        .query_map([index_name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let [(cid, column, collation)] = columns.as_slice() else {
        return Ok(None);
    };

    if column.as_deref() == Some("name") {
        let nocase = collation
            .as_deref()
            .is_some_and(|coll| coll.eq_ignore_ascii_case("nocase"));
        return Ok(Some(if nocase {
            NameKey::Folded
        } else {
            NameKey::Exact
        }));
    }

    // Expression keys report cid -2; the expression is only in the DDL.
    if *cid == -2 {
        let sql: Option<String> = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1;",
                [index_name],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let compact: String = sql
            .unwrap_or_default()
            .to_ascii_lowercase()
            .split_whitespace()
            .collect();
        if compact.contains("(lower(name))") {
            return Ok(Some(NameKey::Folded));
        }
    }

    Ok(None)
}

fn vendor_table_exists(conn: &Connection) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
        );",
        [VENDOR_TABLE],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
