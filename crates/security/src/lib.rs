//! Security module for Advisor: audit logging and privacy filtering.
//!
//! Provides:
//! - **Audit logging**: append-only record of every memory mutation, with
//!   pluggable sinks and JSONL export
//! - **Privacy filter**: rejects content carrying disallowed personal data
//!   before it reaches the memory store

pub mod audit;
pub mod privacy;

pub use audit::{AuditError, AuditLog, AuditSink, JsonlFileSink, TracingSink};
pub use privacy::{PrivacyFilter, PrivacyViolation};
