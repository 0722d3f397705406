//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the backup engines.

pub mod backup;
pub mod job;
pub mod tenant;

pub use backup::{handle_export_command, handle_import_command, handle_upload_command, handle_validate_command};
pub use job::{handle_audit_command, handle_job_command, JobCommands};
pub use tenant::{handle_tenant_command, handle_user_command, TenantCommands, UserCommands};

use crate::error::{VaultError, VaultResult};
use crate::models::{BackupJob, JobId, Tenant, User};
use crate::storage::Storage;

/// Resolve a job by full id or unambiguous id prefix
pub(crate) fn resolve_job(storage: &Storage, identifier: &str) -> VaultResult<BackupJob> {
    if let Ok(id) = identifier.parse::<JobId>() {
        return storage.jobs().require(id);
    }

    let prefix = identifier
        .strip_prefix("job-")
        .unwrap_or(identifier)
        .to_lowercase();
    let mut matches: Vec<BackupJob> = storage
        .jobs()
        .list_all()?
        .into_iter()
        .filter(|job| job.id.to_uuid_string().starts_with(&prefix))
        .collect();

    match matches.len() {
        0 => Err(VaultError::job_not_found(identifier)),
        1 => Ok(matches.remove(0)),
        n => Err(VaultError::InvalidState(format!(
            "'{}' matches {} jobs; use a longer prefix",
            identifier, n
        ))),
    }
}

/// The acting user, when an email was given
pub(crate) fn resolve_user(
    storage: &Storage,
    tenant: &Tenant,
    email: Option<&str>,
) -> VaultResult<Option<User>> {
    email.map(|e| storage.users().find(tenant, e)).transpose()
}

/// Turn a failed or cancelled job into an error for the exit status
pub(crate) fn finished_ok(job: &BackupJob) -> VaultResult<()> {
    if job.status == crate::models::JobStatus::Completed {
        return Ok(());
    }
    Err(VaultError::InvalidState(format!(
        "{} job {} ended {}: {}",
        job.kind,
        job.id,
        job.status,
        job.error_message.as_deref().unwrap_or("no details")
    )))
}
