//! Cancellation and archive housekeeping for existing jobs

use std::fs;
use std::io::ErrorKind;

use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLogger};
use crate::error::{VaultError, VaultResult};
use crate::models::{BackupJob, JobId, JobStatus, Tenant};
use crate::storage::Storage;

/// Operations on jobs other than running them
pub struct JobControl<'a> {
    storage: &'a Storage,
    audit: AuditLogger,
}

impl<'a> JobControl<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            audit: AuditLogger::new(storage.paths().audit_log()),
        }
    }

    /// Cancel a pending or processing job
    ///
    /// A running engine notices at its next checkpoint. Exports discard
    /// their staging area. While an import's record transaction holds the
    /// write lock this waits for the busy timeout and then fails as busy.
    pub fn cancel(&self, job_id: JobId, reason: Option<&str>) -> VaultResult<BackupJob> {
        let jobs = self.storage.jobs();
        let mut job = jobs.require(job_id)?;
        if job.is_terminal() {
            return Err(VaultError::InvalidState(format!(
                "job {} is already {}",
                job.id, job.status
            )));
        }

        let reason = reason.unwrap_or("Cancelled by user");
        job.cancel(reason)?;
        jobs.save(&job)?;

        let tenant = self.tenant_of(&job)?;
        self.audit.log_or_warn(&AuditEntry::for_job(
            &job,
            &tenant.public_id.to_uuid_string(),
            AuditAction::JobCancelled,
            json!({ "reason": reason, "kind": job.kind.as_str() }),
        ));
        info!(job = %job.id, reason, "job cancelled");
        Ok(job)
    }

    /// Remove a job's archive file, keeping the job record
    pub fn delete_archive(&self, job_id: JobId) -> VaultResult<BackupJob> {
        let jobs = self.storage.jobs();
        let mut job = jobs.require(job_id)?;
        if job.status == JobStatus::Processing {
            return Err(VaultError::InvalidState(format!(
                "job {} is still processing",
                job.id
            )));
        }
        let Some(path) = job.file_path.take() else {
            return Err(VaultError::InvalidState(format!(
                "job {} has no archive",
                job.id
            )));
        };

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "archive already gone");
            }
            Err(e) => {
                return Err(VaultError::Io(format!(
                    "Failed to delete {}: {}",
                    path.display(),
                    e
                )))
            }
        }
        jobs.save(&job)?;

        let tenant = self.tenant_of(&job)?;
        self.audit.log_or_warn(&AuditEntry::for_job(
            &job,
            &tenant.public_id.to_uuid_string(),
            AuditAction::ArchiveDeleted,
            json!({ "path": path.display().to_string() }),
        ));
        info!(job = %job.id, path = %path.display(), "archive deleted");
        Ok(job)
    }

    fn tenant_of(&self, job: &BackupJob) -> VaultResult<Tenant> {
        self.storage
            .tenants()
            .get(job.tenant_row_id)?
            .ok_or_else(|| VaultError::tenant_not_found(job.tenant_row_id.to_string()))
    }
}
