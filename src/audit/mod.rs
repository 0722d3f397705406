//! Audit logging for backup jobs
//!
//! Every job lifecycle step (start, completion, failure, cancellation,
//! archive deletion) is appended to a line-delimited JSON log.
//!
//! # Example
//!
//! ```rust,ignore
//! use tenant_vault::audit::{AuditAction, AuditEntry, AuditLogger};
//! use serde_json::json;
//!
//! let logger = AuditLogger::new(paths.audit_log());
//! logger.log(&AuditEntry::new(job.id, AuditAction::ExportStarted, json!({})))?;
//! ```

mod entry;
mod logger;

pub use entry::{AuditAction, AuditEntry};
pub use logger::{AuditLogger, AuditTail};
