//! Job and audit CLI commands

use clap::Subcommand;

use crate::audit::AuditLogger;
use crate::backup::JobControl;
use crate::display::{format_job_details, format_job_list};
use crate::error::VaultResult;
use crate::storage::Storage;

use super::resolve_job;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs, newest first
    List {
        /// Only jobs of this tenant (name or public ID)
        #[arg(short, long)]
        tenant: Option<String>,
        /// Number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show a job's status, options and statistics
    Show {
        /// Job ID or ID prefix
        job: String,
    },
    /// Cancel a pending or running job
    Cancel {
        /// Job ID or ID prefix
        job: String,
        /// Reason recorded on the job
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Delete a job's archive file, keeping the job record
    DeleteArchive {
        /// Job ID or ID prefix
        job: String,
    },
}

/// Handle a job command
pub fn handle_job_command(storage: &Storage, cmd: JobCommands) -> VaultResult<()> {
    match cmd {
        JobCommands::List { tenant, limit } => {
            let mut jobs = match tenant {
                Some(tenant) => {
                    let tenant = storage.tenants().find(&tenant)?;
                    storage.jobs().list_for_tenant(tenant.row_id)?
                }
                None => storage.jobs().list_all()?,
            };
            jobs.truncate(limit);
            print!("{}", format_job_list(&jobs));
        }
        JobCommands::Show { job } => {
            let job = resolve_job(storage, &job)?;
            print!("{}", format_job_details(&job));
        }
        JobCommands::Cancel { job, reason } => {
            let job = resolve_job(storage, &job)?;
            let job = JobControl::new(storage).cancel(job.id, reason.as_deref())?;
            println!("Cancelled {} job {}", job.kind, job.id);
        }
        JobCommands::DeleteArchive { job } => {
            let job = resolve_job(storage, &job)?;
            let path = job.file_path.clone();
            JobControl::new(storage).delete_archive(job.id)?;
            if let Some(path) = path {
                println!("Deleted archive: {}", path.display());
            }
        }
    }
    Ok(())
}

/// Print the most recent audit entries, optionally for one job
pub fn handle_audit_command(storage: &Storage, job: Option<&str>, limit: usize) -> VaultResult<()> {
    let logger = AuditLogger::new(storage.paths().audit_log());
    let job_id = job.map(|job| resolve_job(storage, job)).transpose()?.map(|job| job.id);
    let tail = logger.tail(job_id, limit)?;

    if tail.entries.is_empty() {
        println!("No audit entries found.");
        return Ok(());
    }
    for entry in &tail.entries {
        let payload = if entry.payload.is_null() {
            String::new()
        } else {
            entry.payload.to_string()
        };
        println!(
            "{}  {:<13}  {:<28}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.job_id.to_string(),
            entry.action.as_str(),
            payload
        );
    }

    println!();
    println!("Showing {} of {} entries", tail.entries.len(), tail.matched);
    if tail.unreadable > 0 {
        println!("Skipped {} unreadable lines", tail.unreadable);
    }
    Ok(())
}
