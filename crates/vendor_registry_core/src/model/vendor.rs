//! Vendor domain model.
//!
//! # Responsibility
//! - Define the canonical vendor record stored in `vendor_extractors`.
//! - Validate display names and derive their normalized (lower-cased) key.
//!
//! # Invariants
//! - `id` is stable and never reused for another vendor.
//! - A `VendorName` is trimmed, 1..=100 chars, and ASCII-only, so Rust
//!   lower-casing and SQLite `lower()` always agree.
//! - `version` starts at 1 and only grows.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Maximum display name length, in characters.
pub const MAX_VENDOR_NAME_CHARS: usize = 100;

static VENDOR_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9 _\-]+$").expect("valid vendor name regex"));

/// Stable identifier for a vendor row.
pub type VendorId = Uuid;

/// Validation failures for vendor display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorNameError {
    /// Empty or whitespace-only input.
    Empty,
    /// Longer than [`MAX_VENDOR_NAME_CHARS`] after trimming.
    TooLong { len: usize, max: usize },
    /// Contains characters outside `[A-Za-z0-9 _-]`.
    InvalidCharacters,
}

impl Display for VendorNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "vendor name cannot be empty"),
            Self::TooLong { len, max } => {
                write!(f, "vendor name must be 1-{max} characters, got {len}")
            }
            Self::InvalidCharacters => write!(
                f,
                "vendor name must contain only alphanumeric characters, spaces, hyphens, and underscores"
            ),
        }
    }
}

impl Error for VendorNameError {}

/// Validated vendor display name.
///
/// Keeps the caller's casing for display; uniqueness is decided on
/// [`VendorName::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VendorName(String);

impl VendorName {
    /// Trims and validates a raw display name.
    pub fn parse(raw: &str) -> Result<Self, VendorNameError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VendorNameError::Empty);
        }

        let len = trimmed.chars().count();
        if len > MAX_VENDOR_NAME_CHARS {
            return Err(VendorNameError::TooLong {
                len,
                max: MAX_VENDOR_NAME_CHARS,
            });
        }

        if !VENDOR_NAME_RE.is_match(trimmed) {
            return Err(VendorNameError::InvalidCharacters);
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased key used only for uniqueness comparison.
    pub fn normalized(&self) -> String {
        normalize_name(&self.0)
    }
}

impl Display for VendorName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VendorName {
    type Error = VendorNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VendorName> for String {
    fn from(value: VendorName) -> Self {
        value.0
    }
}

/// Normalizes free-form lookup input the same way the unique index does.
///
/// Mirrors SQLite's built-in `lower()`, which only folds ASCII letters.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Operational status of a vendor extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorStatus {
    /// Extractor passes its checks.
    Operational,
    /// Extractor is failing or not yet verified.
    Broken,
}

impl VendorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operational => "operational",
            Self::Broken => "broken",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "operational" => Some(Self::Operational),
            "broken" => Some(Self::Broken),
            _ => None,
        }
    }
}

/// Canonical vendor record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: VendorName,
    pub status: VendorStatus,
    /// Optimistic-lock counter.
    pub version: i64,
    /// Identifier of the client that registered the vendor.
    pub created_by: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

/// Insert payload for a new vendor.
///
/// Timestamps are assigned by storage; new vendors start `broken` at
/// version 1 until an extractor run proves otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVendor {
    pub id: VendorId,
    pub name: VendorName,
    pub status: VendorStatus,
    pub created_by: String,
}

impl NewVendor {
    pub fn new(name: VendorName, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status: VendorStatus::Broken,
            created_by: created_by.into(),
        }
    }
}
