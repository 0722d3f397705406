//! Tenant backup and restore
//!
//! Export writes one self-describing ZIP archive per tenant; import
//! validates such an archive and restores it into a tenant, optionally a
//! different one, inside a single database transaction.
//!
//! # Archive Format
//!
//! - `metadata.json`: producer, source tenant, schema fingerprint, options
//! - `manifest.json`: one entry per record stream and per file blob, each
//!   with a `sha256:<hex>` checksum
//! - `data/<entity>.ndjson`: one portable record per line
//! - `files/<disk>/<path>`: document blobs, when included
//!
//! Records reference each other by public id only; storage row ids never
//! leave the database.
//!
//! # Example
//!
//! ```rust,ignore
//! use tenant_vault::backup::{ExportEngine, ExportOptions, ImportEngine};
//! use tenant_vault::models::ImportMode;
//!
//! let exporter = ExportEngine::new(&storage, &registry);
//! let job = exporter.create_export(&tenant, Some(&user), ExportOptions::default())?;
//! let job = exporter.run_export(job.id)?;
//!
//! let importer = ImportEngine::new(&storage, &registry);
//! let upload = importer.upload_import(&other, Some(&user), &mut file, None, "acme.zip")?;
//! let report = importer.validate_import(upload.id)?;
//! let job = importer.run_import(upload.id, ImportMode::Replace)?;
//! ```

pub mod archive;
pub mod control;
pub mod export;
pub mod import;
pub mod manifest;
pub mod mapping;
pub mod validate;

pub use control::JobControl;
pub use export::{has_archive, ExportEngine, ExportOptions};
pub use import::ImportEngine;
pub use manifest::{Manifest, Metadata};
pub use mapping::IdMapping;
pub use validate::{validate_archive, ArchiveInfo, ValidationReport};

use rusqlite::Connection;

use crate::error::{VaultError, VaultResult};
use crate::models::{BackupJob, JobId};
use crate::storage::{Database, JobRepository};

/// Polls a job's persisted status between engine steps
///
/// Reads through a separate connection when the database lives in a file.
/// A cancellation can only be committed while the engine holds no write
/// lock, so it is observed outside the import's record transaction.
pub(crate) struct CancelProbe {
    reader: Option<Connection>,
}

impl CancelProbe {
    pub(crate) fn new(db: &Database) -> VaultResult<Self> {
        Ok(Self {
            reader: db.open_reader()?,
        })
    }

    /// `Err(Cancelled)` once the job has been cancelled
    pub(crate) fn check(&self, fallback: &Connection, job_id: JobId) -> VaultResult<()> {
        let conn = self.reader.as_ref().unwrap_or(fallback);
        if JobRepository::new(conn).is_cancelled(job_id)? {
            return Err(VaultError::Cancelled(job_id.to_string()));
        }
        Ok(())
    }
}

/// Persist a job's terminal state
///
/// Returns the stored job instead when it was cancelled in the meantime;
/// a cancellation is never overwritten.
pub(crate) fn store_terminal(
    jobs: &JobRepository<'_>,
    job: &BackupJob,
) -> VaultResult<Option<BackupJob>> {
    match jobs.save(job) {
        Ok(()) => Ok(None),
        Err(VaultError::Cancelled(_)) => Ok(Some(jobs.require(job.id)?)),
        Err(e) => Err(e),
    }
}
