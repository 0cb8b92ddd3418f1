//! Vendor repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist vendors in `vendor_extractors` behind a storage-agnostic trait.
//! - Translate name-index violations into `RegistryError::DuplicateName`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - The unique name index is the only conflict arbiter; no write path
//!   checks for an existing name before writing.
//! - Every write runs in one IMMEDIATE transaction (or is one statement),
//!   so a rejected write leaves nothing behind.
//! - Name lookups compare on `lower(name)` so the functional index serves them.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::name_index::is_name_unique_violation;
use crate::db::DbError;
use crate::model::vendor::{
    NewVendor, Vendor, VendorId, VendorName, VendorNameError, VendorStatus,
};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const VENDOR_SELECT_SQL: &str = "SELECT
    id,
    name,
    status,
    version,
    created_by,
    created_at,
    updated_at
FROM vendor_extractors";

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors from vendor registry operations.
#[derive(Debug)]
pub enum RegistryError {
    /// Name rejected before reaching storage.
    InvalidName(VendorNameError),
    /// Another vendor already owns this normalized name.
    ///
    /// Carries only the normalized form so the outcome does not depend on
    /// which casing was stored first.
    DuplicateName {
        normalized_name: String,
        existing_id: Option<VendorId>,
    },
    NotFound(VendorId),
    /// Optimistic lock failure: the row moved on since the caller read it.
    VersionConflict {
        id: VendorId,
        expected: i64,
        actual: i64,
    },
    /// Storage failure passed through untouched.
    Storage(DbError),
    InvalidData(String),
}

impl RegistryError {
    /// Returns whether the failure is a transport/lock problem the caller's
    /// own retry policy may retry. Domain outcomes never are.
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_storage_unavailable(),
            _ => false,
        }
    }
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(err) => write!(f, "{err}"),
            Self::DuplicateName {
                normalized_name,
                existing_id: Some(id),
            } => write!(
                f,
                "vendor name `{normalized_name}` is already registered (existing vendor {id})"
            ),
            Self::DuplicateName {
                normalized_name,
                existing_id: None,
            } => write!(f, "vendor name `{normalized_name}` is already registered"),
            Self::NotFound(id) => write!(f, "vendor not found: {id}"),
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "vendor {id} version conflict: expected {expected}, found {actual}"
            ),
            Self::Storage(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted vendor data: {message}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidName(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::DuplicateName { .. }
            | Self::NotFound(_)
            | Self::VersionConflict { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<VendorNameError> for RegistryError {
    fn from(value: VendorNameError) -> Self {
        Self::InvalidName(value)
    }
}

impl From<DbError> for RegistryError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}

/// Query options for listing vendors.
#[derive(Debug, Clone, Default)]
pub struct VendorListQuery {
    pub status: Option<VendorStatus>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for vendor persistence.
pub trait VendorRepository {
    fn insert_vendor(&self, vendor: &NewVendor) -> RegistryResult<VendorId>;
    /// Returns the stored record after the rename.
    fn rename_vendor(&self, id: VendorId, name: &VendorName) -> RegistryResult<Vendor>;
    fn get_vendor(&self, id: VendorId) -> RegistryResult<Option<Vendor>>;
    /// `normalized_name` must already be lower-cased and trimmed.
    fn find_by_normalized_name(&self, normalized_name: &str) -> RegistryResult<Option<Vendor>>;
    fn list_vendors(&self, query: &VendorListQuery) -> RegistryResult<Vec<Vendor>>;
    fn update_status(
        &self,
        id: VendorId,
        expected_version: i64,
        status: VendorStatus,
    ) -> RegistryResult<Vendor>;
    fn delete_vendor(&self, id: VendorId) -> RegistryResult<()>;
}

/// SQLite-backed vendor repository.
///
/// Write methods open their own transaction; calling them while the
/// connection is already inside one fails with a storage error.
pub struct SqliteVendorRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteVendorRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn begin(&self) -> RegistryResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl VendorRepository for SqliteVendorRepository<'_> {
    fn insert_vendor(&self, vendor: &NewVendor) -> RegistryResult<VendorId> {
        let tx = self.begin()?;

        let inserted = tx.execute(
            "INSERT INTO vendor_extractors (id, name, status, created_by)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                vendor.id.to_string(),
                vendor.name.as_str(),
                vendor.status.as_str(),
                vendor.created_by.as_str(),
            ],
        );
        if let Err(err) = inserted {
            return Err(map_write_error(&tx, err, &vendor.name, None));
        }

        tx.commit()?;
        Ok(vendor.id)
    }

    fn rename_vendor(&self, id: VendorId, name: &VendorName) -> RegistryResult<Vendor> {
        let tx = self.begin()?;
        let current = select_vendor(&tx, id)?.ok_or(RegistryError::NotFound(id))?;

        if current.name == *name {
            tx.commit()?;
            return Ok(current);
        }

        let updated = tx.execute(
            "UPDATE vendor_extractors
             SET
                name = ?1,
                version = version + 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2;",
            params![name.as_str(), id.to_string()],
        );
        if let Err(err) = updated {
            return Err(map_write_error(&tx, err, name, Some(id)));
        }

        let renamed = select_vendor(&tx, id)?.ok_or_else(|| {
            RegistryError::InvalidData(format!("vendor {id} missing after rename"))
        })?;
        tx.commit()?;
        Ok(renamed)
    }

    fn get_vendor(&self, id: VendorId) -> RegistryResult<Option<Vendor>> {
        select_vendor(self.conn, id)
    }

    fn find_by_normalized_name(&self, normalized_name: &str) -> RegistryResult<Option<Vendor>> {
        // Legacy schemas may still hold case variants; oldest wins.
        let mut stmt = self.conn.prepare_cached(&format!(
            "{VENDOR_SELECT_SQL}
             WHERE lower(name) = ?1
             ORDER BY created_at ASC, id ASC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([normalized_name])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_vendor_row(row)?));
        }
        Ok(None)
    }

    fn list_vendors(&self, query: &VendorListQuery) -> RegistryResult<Vec<Vendor>> {
        let mut sql = format!("{VENDOR_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }

        sql.push_str(" ORDER BY lower(name) ASC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut vendors = Vec::new();
        while let Some(row) = rows.next()? {
            vendors.push(parse_vendor_row(row)?);
        }

        Ok(vendors)
    }

    fn update_status(
        &self,
        id: VendorId,
        expected_version: i64,
        status: VendorStatus,
    ) -> RegistryResult<Vendor> {
        let tx = self.begin()?;
        let current = select_vendor(&tx, id)?.ok_or(RegistryError::NotFound(id))?;
        if current.version != expected_version {
            return Err(RegistryError::VersionConflict {
                id,
                expected: expected_version,
                actual: current.version,
            });
        }

        tx.execute(
            "UPDATE vendor_extractors
             SET
                status = ?1,
                version = version + 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2 AND version = ?3;",
            params![status.as_str(), id.to_string(), expected_version],
        )?;

        let updated = select_vendor(&tx, id)?.ok_or_else(|| {
            RegistryError::InvalidData(format!("vendor {id} missing after status update"))
        })?;
        tx.commit()?;
        Ok(updated)
    }

    fn delete_vendor(&self, id: VendorId) -> RegistryResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM vendor_extractors WHERE id = ?1;",
            [id.to_string()],
        )?;

        if changed == 0 {
            return Err(RegistryError::NotFound(id));
        }

        Ok(())
    }
}

/// Turns a failed write into `DuplicateName` when the name index rejected
/// it, or passes the storage error through otherwise.
fn map_write_error(
    conn: &Connection,
    err: rusqlite::Error,
    name: &VendorName,
    exclude: Option<VendorId>,
) -> RegistryError {
    if !is_name_unique_violation(&err) {
        return err.into();
    }

    let normalized_name = name.normalized();
    let existing_id = match find_owner_id(conn, &normalized_name, exclude) {
        Ok(id) => id,
        Err(lookup_err) => {
            warn!(
                "event=vendor_conflict_owner module=registry status=error error={}",
                lookup_err
            );
            None
        }
    };

    RegistryError::DuplicateName {
        normalized_name,
        existing_id,
    }
}

fn find_owner_id(
    conn: &Connection,
    normalized_name: &str,
    exclude: Option<VendorId>,
) -> RegistryResult<Option<VendorId>> {
    let id_text: Option<String> = conn
        .query_row(
            "SELECT id
             FROM vendor_extractors
             WHERE lower(name) = ?1
               AND (?2 IS NULL OR id <> ?2)
             ORDER BY created_at ASC, id ASC
             LIMIT 1;",
            params![normalized_name, exclude.map(|id| id.to_string())],
            |row| row.get(0),
        )
        .optional()?;

    id_text.map(|text| parse_vendor_id(&text)).transpose()
}

fn select_vendor(conn: &Connection, id: VendorId) -> RegistryResult<Option<Vendor>> {
    let mut stmt = conn.prepare_cached(&format!("{VENDOR_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_vendor_row(row)?));
    }
    Ok(None)
}

fn parse_vendor_row(row: &Row<'_>) -> RegistryResult<Vendor> {
    let id_text: String = row.get("id")?;
    let id = parse_vendor_id(&id_text)?;

    let name_text: String = row.get("name")?;
    let name = VendorName::parse(&name_text)
        .ok()
        .filter(|name| name.as_str() == name_text)
        .ok_or_else(|| {
            RegistryError::InvalidData(format!(
                "invalid name in vendor_extractors.name for vendor {id}"
            ))
        })?;

    let status_text: String = row.get("status")?;
    let status = VendorStatus::parse(&status_text).ok_or_else(|| {
        RegistryError::InvalidData(format!(
            "invalid status `{status_text}` in vendor_extractors.status"
        ))
    })?;

    let version: i64 = row.get("version")?;
    if version < 1 {
        return Err(RegistryError::InvalidData(format!(
            "invalid version `{version}` in vendor_extractors.version"
        )));
    }

    Ok(Vendor {
        id,
        name,
        status,
        version,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_vendor_id(text: &str) -> RegistryResult<VendorId> {
    Uuid::parse_str(text).map_err(|_| {
        RegistryError::InvalidData(format!("invalid uuid value `{text}` in vendor_extractors.id"))
    })
}
