//! Custom error types for tenant-vault
//!
//! This module defines the error hierarchy for the backup and restore engines
//! using thiserror. The variants follow the failure classes the engines care
//! about: archive validation, critical transaction failures that abort an
//! import, recoverable per-record failures, and file restoration failures.

use thiserror::Error;

/// The main error type for tenant-vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Database errors that are not tied to a single record
    #[error("Database error: {0}")]
    Database(String),

    /// ZIP container errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// The archive is structurally invalid or contains unsafe paths
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Aborts the whole import transaction
    #[error("Critical transaction error: {0}")]
    CriticalTransaction(String),

    /// A single record could not be imported; the record is skipped
    #[error("Record error in {entity_type}: {message}")]
    Record {
        entity_type: String,
        message: String,
    },

    /// A single file blob could not be restored
    #[error("File restore error for {path}: {message}")]
    FileRestore { path: String, message: String },

    /// Any failure while building an export
    #[error("Export error: {0}")]
    Export(String),

    /// Illegal backup job state transition
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// The job was cancelled while running
    #[error("Job {0} was cancelled")]
    Cancelled(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },
}

impl VaultError {
    /// Create a "not found" error for tenants
    pub fn tenant_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Tenant",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for users
    pub fn user_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "User",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for backup jobs
    pub fn job_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup job",
            identifier: identifier.into(),
        }
    }

    /// Create a per-record error
    pub fn record(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Record {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error must abort the import transaction
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::CriticalTransaction(_) | Self::Cancelled(_))
    }

    /// Short machine-readable class name, stored on failed jobs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Database(_) => "database",
            Self::Archive(_) => "archive",
            Self::Validation(_) => "validation",
            Self::CriticalTransaction(_) => "critical_transaction",
            Self::Record { .. } => "record",
            Self::FileRestore { .. } => "file_restore",
            Self::Export(_) => "export",
            Self::InvalidState(_) => "invalid_state",
            Self::Cancelled(_) => "cancelled",
            Self::NotFound { .. } => "not_found",
        }
    }
}

/// Classify a database error raised while writing an imported record.
///
/// Unknown tables or columns, uniqueness violations and an aborted
/// transaction are critical; everything else only affects the record.
pub fn classify_db_error(entity_type: &str, err: rusqlite::Error) -> VaultError {
    use rusqlite::ffi;

    let critical = match &err {
        rusqlite::Error::SqliteFailure(code, message) => {
            let message = message.as_deref().unwrap_or_default();
            code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || code.code == ffi::ErrorCode::OperationAborted
                || is_schema_drift_message(message)
        }
        other => is_schema_drift_message(&other.to_string()),
    };

    if critical {
        VaultError::CriticalTransaction(format!("{}: {}", entity_type, err))
    } else {
        VaultError::record(entity_type, err.to_string())
    }
}

fn is_schema_drift_message(message: &str) -> bool {
    message.contains("no such table")
        || message.contains("no such column")
        || message.contains("has no column named")
        || message.contains("cannot rollback - no transaction is active")
}

// Implement From traits for common error types

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<zip::result::ZipError> for VaultError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Result type alias for tenant-vault operations
pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = VaultError::tenant_not_found("acme");
        assert_eq!(err.to_string(), "Tenant not found: acme");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validation_error_joins_messages() {
        let err = VaultError::Validation(vec!["first".into(), "second".into()]);
        assert_eq!(err.to_string(), "Validation error: first; second");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_unique_violation_is_critical() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (code TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();

        assert!(classify_db_error("accounts", err).is_critical());
    }

    #[test]
    fn test_unknown_column_is_critical() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (code TEXT);").unwrap();
        let err = conn.execute("INSERT INTO t (missing) VALUES ('a')", []).unwrap_err();

        assert!(classify_db_error("accounts", err).is_critical());
    }

    #[test]
    fn test_not_null_violation_is_recoverable() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (code TEXT NOT NULL);").unwrap();
        let err = conn.execute("INSERT INTO t (code) VALUES (NULL)", []).unwrap_err();

        let classified = classify_db_error("accounts", err);
        assert!(!classified.is_critical());
        assert!(matches!(classified, VaultError::Record { .. }));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let vault_err: VaultError = io_err.into();
        assert!(matches!(vault_err, VaultError::Io(_)));
    }
}
