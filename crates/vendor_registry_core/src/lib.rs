//! Case-insensitive vendor name registry.
//!
//! Vendor names are unique once lower-cased. The database enforces this
//! through a functional unique index; this crate maps its verdicts to typed
//! errors and owns the schema migration that installs it.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, RegistryConfig};
pub use db::migrations::{MigrationDirection, MigrationReport};
pub use db::name_index::{downgrade, enforcement_state, scan_duplicate_names, upgrade};
pub use db::{
    DbError, DuplicateNameGroup, DuplicateNameMember, EnforcementState,
    MigrationPreconditionError,
};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};
pub use model::vendor::{
    normalize_name, NewVendor, Vendor, VendorId, VendorName, VendorNameError, VendorStatus,
};
pub use repo::vendor_repo::{
    RegistryError, RegistryResult, SqliteVendorRepository, VendorListQuery, VendorRepository,
};
pub use service::vendor_service::VendorRegistry;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
