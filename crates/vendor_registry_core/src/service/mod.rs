//! Registry use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep CLI and embedding callers decoupled from storage details.

pub mod vendor_service;
