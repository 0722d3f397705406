//! Backup job model
//!
//! A backup job is the status record both engines report into and that
//! callers poll. Its lifecycle is a small state machine:
//!
//! ```text
//! pending -> processing -> completed | failed | cancelled
//! pending -> failed | cancelled
//! ```
//!
//! Terminal jobs never change state again; the only later mutation is the
//! removal of their archive file.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::JobId;
use crate::error::{VaultError, VaultResult};

/// What a job does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Export,
    Import,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "export" => Some(Self::Export),
            "import" => Some(Self::Import),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed, failed and cancelled jobs are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pending or processing
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an import treats the tenant's existing data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Delete the tenant's rows, then import (takes a pre-restore snapshot)
    #[default]
    Replace,
    /// Keep existing rows; upsert same-tenant records by public id
    Merge,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "replace" => Some(Self::Replace),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backup or restore job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: JobId,
    /// Row id of the tenant the job belongs to
    pub tenant_row_id: i64,
    /// Row id of the initiating user; `None` once that user is deleted
    pub user_row_id: Option<i64>,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Percentage, never decreases
    pub progress: u8,
    pub current_step: Option<String>,
    pub file_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    /// `sha256:<hex>` of the archive file
    pub checksum: Option<String>,
    /// Options such as `include_files`, `import_mode`, `is_pre_restore`
    pub config: Map<String, Value>,
    /// Counts per entity type plus file tallies
    pub stats: Map<String, Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackupJob {
    /// Create a new pending job
    pub fn new(
        kind: JobKind,
        tenant_row_id: i64,
        user_row_id: Option<i64>,
        config: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_row_id,
            user_row_id,
            kind,
            status: JobStatus::Pending,
            progress: 0,
            current_step: None,
            file_path: None,
            file_size: None,
            checksum: None,
            config,
            stats: Map::new(),
            error_message: None,
            error_details: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> VaultResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(VaultError::InvalidState(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// pending -> processing
    pub fn start(&mut self) -> VaultResult<()> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    /// Record a milestone. Lower percentages than the current one are ignored.
    pub fn set_progress(&mut self, percent: u8, step: impl Into<String>) {
        self.progress = self.progress.max(percent.min(100));
        self.current_step = Some(step.into());
        self.updated_at = Utc::now();
    }

    /// processing -> completed
    pub fn complete(&mut self, stats: Map<String, Value>) -> VaultResult<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.current_step = Some("Completed".to_string());
        self.stats = stats;
        Ok(())
    }

    /// pending|processing -> failed, capturing the error class and message
    pub fn fail(&mut self, err: &VaultError) -> VaultResult<()> {
        self.transition(JobStatus::Failed)?;
        self.current_step = Some("Failed".to_string());
        self.error_message = Some(err.to_string());
        self.error_details = Some(serde_json::json!({ "kind": err.kind() }));
        Ok(())
    }

    /// pending|processing -> cancelled, recording the reason
    pub fn cancel(&mut self, reason: impl Into<String>) -> VaultResult<()> {
        self.transition(JobStatus::Cancelled)?;
        self.current_step = Some("Cancelled".to_string());
        self.error_message = Some(reason.into());
        self.error_details = Some(serde_json::json!({ "kind": "cancelled" }));
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }

    /// Whether an export should carry file blobs
    pub fn include_files(&self) -> bool {
        self.config_bool("include_files").unwrap_or(true)
    }

    /// Whether this export is an automatic pre-restore snapshot
    pub fn is_pre_restore(&self) -> bool {
        self.config_bool("is_pre_restore").unwrap_or(false)
    }

    /// Import mode recorded on the job, if any
    pub fn import_mode(&self) -> Option<ImportMode> {
        self.config
            .get("import_mode")
            .and_then(Value::as_str)
            .and_then(ImportMode::parse)
    }
}
