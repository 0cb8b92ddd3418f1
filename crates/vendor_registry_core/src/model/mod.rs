//! Domain model for the vendor name registry.
//!
//! # Responsibility
//! - Define canonical data structures used by registry logic.
//! - Own display-name validation and normalization rules.
//!
//! # Invariants
//! - Every vendor is identified by a stable `VendorId`.
//! - Uniqueness is decided on the normalized name, never on display casing.

pub mod vendor;
