//! Verification of published aggregates.
//!
//! - [`AuditReport`] — published vs. quorum-recomputed aggregate
//! - [`AuditLog`] — append-only history of rounds and audits

pub mod audit;

pub use audit::{AuditEntry, AuditLog, AuditReport};
