//! Export and import CLI commands
//!
//! Engines run synchronously in the invoking process; `tvault jobs cancel`
//! from another process stops them at their next checkpoint outside the
//! import's record transaction.

use std::fs::File;
use std::path::Path;

use crate::backup::{ExportEngine, ExportOptions, ImportEngine};
use crate::display::{format_job_details, format_validation_report};
use crate::error::{VaultError, VaultResult};
use crate::models::{ImportMode, JobKind};
use crate::registry::Registry;
use crate::storage::Storage;

use super::{finished_ok, resolve_job, resolve_user};

/// Create and run an export of one tenant
pub fn handle_export_command(
    storage: &Storage,
    tenant: &str,
    user: Option<&str>,
    no_files: bool,
) -> VaultResult<()> {
    let registry = Registry::standard();
    let tenant = storage.tenants().find(tenant)?;
    let user = resolve_user(storage, &tenant, user)?;
    if storage.jobs().has_active_job(tenant.row_id, JobKind::Export)? {
        return Err(VaultError::InvalidState(format!(
            "{} already has an export in progress",
            tenant.name
        )));
    }
    let options = ExportOptions {
        include_files: storage.settings().include_files_default && !no_files,
        is_pre_restore: false,
    };

    let engine = ExportEngine::new(storage, &registry);
    let job = engine.create_export(&tenant, user.as_ref(), options)?;
    println!("Exporting {} (job {})...", tenant.name, job.id);
    let job = engine.run_export(job.id)?;

    println!();
    print!("{}", format_job_details(&job));
    finished_ok(&job)
}

/// Store an archive as a pending import for a tenant
pub fn handle_upload_command(
    storage: &Storage,
    tenant: &str,
    file: &Path,
    user: Option<&str>,
) -> VaultResult<()> {
    let registry = Registry::standard();
    let tenant = storage.tenants().find(tenant)?;
    let user = resolve_user(storage, &tenant, user)?;

    let mut source = File::open(file)
        .map_err(|e| VaultError::Io(format!("Failed to open {}: {}", file.display(), e)))?;
    let declared = source.metadata()?.len();
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());

    let job = ImportEngine::new(storage, &registry).upload_import(
        &tenant,
        user.as_ref(),
        &mut source,
        Some(declared),
        &filename,
    )?;
    println!("Uploaded {} for {}", filename, tenant.name);
    println!("  Job: {}", job.id);
    println!();
    println!("Check it with: tvault validate {}", job.id);
    Ok(())
}

/// Validate a pending import without touching any data
pub fn handle_validate_command(storage: &Storage, job: &str) -> VaultResult<()> {
    let registry = Registry::standard();
    let job = resolve_job(storage, job)?;
    let report = ImportEngine::new(storage, &registry).validate_import(job.id)?;
    print!("{}", format_validation_report(&report));
    report.into_result().map(|_| ())
}

/// Run a pending import
pub fn handle_import_command(storage: &Storage, job: &str, mode: &str, force: bool) -> VaultResult<()> {
    let mode = ImportMode::parse(mode).ok_or_else(|| {
        VaultError::Config(format!("Invalid import mode: '{}'. Valid modes: replace, merge", mode))
    })?;
    let job = resolve_job(storage, job)?;

    if mode == ImportMode::Replace && !force {
        println!("WARNING: Replace deletes the tenant's current records before importing.");
        println!("A pre-restore snapshot is taken first.");
        println!("To proceed, run again with --force flag:");
        println!("  tvault import {} --mode replace --force", job.id);
        return Ok(());
    }

    let registry = Registry::standard();
    println!("Importing (job {}, {} mode)...", job.id, mode);
    let job = ImportEngine::new(storage, &registry).run_import(job.id, mode)?;

    println!();
    print!("{}", format_job_details(&job));
    finished_ok(&job)
}
