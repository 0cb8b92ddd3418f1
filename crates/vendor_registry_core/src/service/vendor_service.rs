//! Vendor registry use-case service.
//!
//! # Responsibility
//! - Provide `register` / `rename` / `lookup` entry points for callers.
//! - Validate names before they reach storage.
//! - Emit metadata-only registry events.
//!
//! # Invariants
//! - Blank names never reach the repository.
//! - Conflicts are reported once and never retried here.
//! - Service layer remains storage-agnostic.

use crate::model::vendor::{
    normalize_name, NewVendor, Vendor, VendorId, VendorName, VendorNameError, VendorStatus,
};
use crate::repo::vendor_repo::{RegistryError, RegistryResult, VendorListQuery, VendorRepository};
use log::{error, info, warn};
use std::time::Instant;

/// Recorded as `created_by` when the caller does not identify itself.
pub const DEFAULT_CLIENT_ID: &str = "vendor_registry";

/// Case-insensitive vendor name registry over a repository implementation.
pub struct VendorRegistry<R: VendorRepository> {
    repo: R,
    client_id: String,
}

impl<R: VendorRepository> VendorRegistry<R> {
    /// Creates a registry recording writes as [`DEFAULT_CLIENT_ID`].
    pub fn new(repo: R) -> Self {
        Self::with_client(repo, DEFAULT_CLIENT_ID)
    }

    pub fn with_client(repo: R, client_id: impl Into<String>) -> Self {
        Self {
            repo,
            client_id: client_id.into(),
        }
    }

    /// Registers a new vendor under `name`.
    ///
    /// # Errors
    /// - `InvalidName` for blank, overlong or malformed names.
    /// - `DuplicateName` when any vendor already owns `lower(name)`.
    pub fn register(&self, name: &str) -> RegistryResult<VendorId> {
        let started_at = Instant::now();
        let result = VendorName::parse(name)
            .map_err(RegistryError::from)
            .and_then(|name| {
                let vendor = NewVendor::new(name, self.client_id.as_str());
                self.repo.insert_vendor(&vendor)
            });
        log_outcome("vendor_register", started_at, name.len(), &result, |id| {
            id.to_string()
        });
        result
    }

    /// Renames vendor `id`. Renaming to a casing of its own current name
    /// succeeds; an identical name is a no-op.
    pub fn rename(&self, id: VendorId, new_name: &str) -> RegistryResult<Vendor> {
        let started_at = Instant::now();
        let result = VendorName::parse(new_name)
            .map_err(RegistryError::from)
            .and_then(|name| self.repo.rename_vendor(id, &name));
        log_outcome("vendor_rename", started_at, new_name.len(), &result, |vendor| {
            format!("{} version={}", vendor.id, vendor.version)
        });
        result
    }

    /// Resolves `name` case-insensitively to a vendor id.
    pub fn lookup(&self, name: &str) -> RegistryResult<Option<VendorId>> {
        Ok(self.find_by_name(name)?.map(|vendor| vendor.id))
    }

    /// Resolves `name` case-insensitively to the full vendor record.
    pub fn find_by_name(&self, name: &str) -> RegistryResult<Option<Vendor>> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Err(RegistryError::InvalidName(VendorNameError::Empty));
        }
        self.repo.find_by_normalized_name(&normalized)
    }

    pub fn get(&self, id: VendorId) -> RegistryResult<Option<Vendor>> {
        self.repo.get_vendor(id)
    }

    /// Lists vendors ordered by normalized name.
    pub fn list(&self, query: &VendorListQuery) -> RegistryResult<Vec<Vendor>> {
        self.repo.list_vendors(query)
    }

    /// Sets operational status with optimistic locking on `expected_version`.
    pub fn update_status(
        &self,
        id: VendorId,
        expected_version: i64,
        status: VendorStatus,
    ) -> RegistryResult<Vendor> {
        let started_at = Instant::now();
        let result = self.repo.update_status(id, expected_version, status);
        log_outcome("vendor_status", started_at, 0, &result, |vendor| {
            format!("{} version={}", vendor.id, vendor.version)
        });
        result
    }

    /// Deletes vendor `id`, freeing its normalized name.
    pub fn delete(&self, id: VendorId) -> RegistryResult<()> {
        let started_at = Instant::now();
        let result = self.repo.delete_vendor(id);
        log_outcome("vendor_delete", started_at, 0, &result, |_| id.to_string());
        result
    }
}

fn log_outcome<T>(
    event: &str,
    started_at: Instant,
    name_len: usize,
    result: &RegistryResult<T>,
    describe: impl FnOnce(&T) -> String,
) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(value) => info!(
            "event={} module=registry status=ok vendor_id={} duration_ms={}",
            event,
            describe(value),
            duration_ms
        ),
        Err(RegistryError::DuplicateName { existing_id, .. }) => warn!(
            "event={} module=registry status=conflict name_len={} existing_id={} duration_ms={}",
            event,
            name_len,
            existing_id.map_or_else(|| "unknown".to_string(), |id| id.to_string()),
            duration_ms
        ),
        Err(err @ (RegistryError::InvalidName(_)
        | RegistryError::NotFound(_)
        | RegistryError::VersionConflict { .. })) => warn!(
            "event={} module=registry status=rejected name_len={} duration_ms={} error={}",
            event, name_len, duration_ms, err
        ),
        Err(err) => error!(
            "event={} module=registry status=error duration_ms={} retryable={} error={}",
            event,
            duration_ms,
            err.is_storage_unavailable(),
            err
        ),
    }
}
