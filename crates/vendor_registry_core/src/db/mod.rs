//! SQLite storage bootstrap, schema migration and name-index entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the registry.
//! - Apply and revert schema migrations in deterministic order.
//! - Expose the operator-facing case-insensitive name index procedure.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Registry code must not read/write vendor rows before migrations succeed.
//! - Exactly one unique index over vendor names is live between migrations.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
pub mod name_index;
mod open;

pub use name_index::{DuplicateNameGroup, DuplicateNameMember, EnforcementState};
pub use open::{open_configured, open_db, open_db_in_memory, open_db_unmigrated};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    UnknownMigrationTarget {
        target: u32,
        latest_supported: u32,
    },
    MigrationPrecondition(MigrationPreconditionError),
    /// The name index was rebuilt but another unique index still overrides it.
    EnforcementNotReached {
        expected: EnforcementState,
        actual: EnforcementState,
    },
}

impl DbError {
    /// Returns whether this is a transport/lock failure a caller may retry.
    ///
    /// Constraint violations and schema errors are deterministic and never
    /// classify as unavailable.
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::DiskFull
            ),
            _ => false,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::UnknownMigrationTarget {
                target,
                latest_supported,
            } => write!(
                f,
                "migration target {target} is unknown; latest supported is {latest_supported}"
            ),
            Self::MigrationPrecondition(err) => write!(f, "{err}"),
            Self::EnforcementNotReached { expected, actual } => write!(
                f,
                "name enforcement is {actual} after repair, expected {expected}; \
                 inspect unique indexes on vendor_extractors"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::MigrationPrecondition(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. }
            | Self::UnknownMigrationTarget { .. }
            | Self::EnforcementNotReached { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<MigrationPreconditionError> for DbError {
    fn from(value: MigrationPreconditionError) -> Self {
        Self::MigrationPrecondition(value)
    }
}

/// Raised when a migration cannot run because existing rows violate the
/// uniqueness rule it is about to install.
///
/// The migration transaction is rolled back before this error is returned;
/// `enforcement` is the state observed afterwards, so the operator sees which
/// guarantee is actually live.
#[derive(Debug)]
pub struct MigrationPreconditionError {
    /// Migration version that was refused.
    pub version: u32,
    /// Rows sharing a normalized name, grouped by that name.
    pub duplicates: Vec<DuplicateNameGroup>,
    /// Name enforcement observed after rollback.
    pub enforcement: EnforcementState,
    /// Raw storage error when the index build itself rejected the data.
    pub storage_error: Option<rusqlite::Error>,
}

impl Display for MigrationPreconditionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let row_count: usize = self.duplicates.iter().map(|g| g.members.len()).sum();
        write!(
            f,
            "migration {} refused: {} normalized vendor name(s) shared by {} rows; name enforcement is {}",
            self.version,
            self.duplicates.len(),
            row_count,
            self.enforcement
        )?;
        if let Some(err) = &self.storage_error {
            write!(f, "; storage error: {err}")?;
        }
        Ok(())
    }
}

impl Error for MigrationPreconditionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.storage_error
            .as_ref()
            .map(|err| err as &(dyn Error + 'static))
    }
}
