//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes only accept validated `VendorName`s.
//! - Repository APIs return semantic errors (`DuplicateName`, `NotFound`)
//!   distinct from storage transport errors.

pub mod vendor_repo;
