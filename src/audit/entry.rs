//! Audit entry data structures
//!
//! Defines the lifecycle actions recorded for backup jobs and the entry
//! format itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{BackupJob, JobId};

/// Job lifecycle actions that are audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ExportStarted,
    ExportCompleted,
    ExportFailed,
    ImportUploaded,
    ImportValidated,
    ImportStarted,
    ImportCompleted,
    ImportFailed,
    PreRestoreSnapshotCreated,
    JobCancelled,
    ArchiveDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExportStarted => "export_started",
            Self::ExportCompleted => "export_completed",
            Self::ExportFailed => "export_failed",
            Self::ImportUploaded => "import_uploaded",
            Self::ImportValidated => "import_validated",
            Self::ImportStarted => "import_started",
            Self::ImportCompleted => "import_completed",
            Self::ImportFailed => "import_failed",
            Self::PreRestoreSnapshotCreated => "pre_restore_snapshot_created",
            Self::JobCancelled => "job_cancelled",
            Self::ArchiveDeleted => "archive_deleted",
        }
    }

    /// Whether the action marks a job reaching a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExportCompleted
                | Self::ExportFailed
                | Self::ImportCompleted
                | Self::ImportFailed
                | Self::JobCancelled
        )
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the action occurred (UTC)
    pub timestamp: DateTime<Utc>,

    /// Job the action belongs to
    pub job_id: JobId,

    pub action: AuditAction,

    /// Tenant public id, recorded for filtering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Structured details (stats, errors, file names)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl AuditEntry {
    pub fn new(job_id: JobId, action: AuditAction, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id,
            action,
            tenant: None,
            payload,
        }
    }

    /// Entry for `job`, tagged with its tenant
    pub fn for_job(job: &BackupJob, tenant_public_id: &str, action: AuditAction, payload: Value) -> Self {
        Self {
            tenant: Some(tenant_public_id.to_string()),
            ..Self::new(job.id, action, payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&AuditAction::PreRestoreSnapshotCreated).unwrap();
        assert_eq!(json, "\"pre_restore_snapshot_created\"");
        assert_eq!(AuditAction::ImportFailed.to_string(), "import_failed");
    }

    #[test]
    fn test_entry_round_trip() {
        let entry = AuditEntry::new(JobId::new(), AuditAction::ExportCompleted, json!({"accounts": 3}));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("\"tenant\""));

        let parsed: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id, entry.job_id);
        assert_eq!(parsed.payload["accounts"], 3);
    }

    #[test]
    fn test_terminal_actions() {
        assert!(AuditAction::ImportCompleted.is_terminal());
        assert!(AuditAction::JobCancelled.is_terminal());
        assert!(!AuditAction::ImportValidated.is_terminal());
    }
}
