//! Export engine
//!
//! Produces one ZIP archive per job: `metadata.json`, `manifest.json`, one
//! NDJSON stream per non-empty entity type and, optionally, the tenant's
//! document blobs. The archive is staged in a private temp directory and
//! only moved into durable storage once it is complete.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::archive::{is_unsafe_member, package_dir, sha256_file, HashingWriter};
use super::manifest::{
    file_member, sha256_label, CreatedBy, EntityEntry, FileEntry, Manifest, Metadata,
    BACKUP_VERSION, CHECKSUM_ALGO, MANIFEST_FILE, METADATA_FILE,
};
use super::{store_terminal, CancelProbe};
use crate::audit::{AuditAction, AuditEntry, AuditLogger};
use crate::error::{VaultError, VaultResult};
use crate::models::{BackupJob, JobId, JobKind, JobStatus, Tenant, User};
use crate::registry::{EntityType, Registry, Transformer};
use crate::storage::Storage;

/// Options recorded in an export job's config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub include_files: bool,
    /// Automatic snapshot taken before a replace import
    pub is_pre_restore: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_files: true,
            is_pre_restore: false,
        }
    }
}

/// What a finished archive looks like
struct ExportOutcome {
    path: PathBuf,
    size: u64,
    checksum: String,
    stats: Map<String, Value>,
}

/// Builds tenant archives for export jobs
pub struct ExportEngine<'a> {
    storage: &'a Storage,
    registry: &'a Registry,
    audit: AuditLogger,
}

impl<'a> ExportEngine<'a> {
    pub fn new(storage: &'a Storage, registry: &'a Registry) -> Self {
        Self {
            storage,
            registry,
            audit: AuditLogger::new(storage.paths().audit_log()),
        }
    }

    /// Create a pending export job
    pub fn create_export(
        &self,
        tenant: &Tenant,
        initiator: Option<&User>,
        options: ExportOptions,
    ) -> VaultResult<BackupJob> {
        let mut config = Map::new();
        config.insert("include_files".into(), Value::Bool(options.include_files));
        config.insert("is_pre_restore".into(), Value::Bool(options.is_pre_restore));

        let job = BackupJob::new(
            JobKind::Export,
            tenant.row_id,
            initiator.map(|u| u.row_id),
            config,
        );
        self.storage.jobs().insert(&job)?;
        debug!(job = %job.id, tenant = %tenant.public_id, "export job created");
        Ok(job)
    }

    /// Run a pending export job to a terminal state
    ///
    /// Returns the job as persisted afterwards. An `Err` means the job could
    /// not be started or its status could not be recorded; a failed export
    /// is reported through the returned job's status.
    pub fn run_export(&self, job_id: JobId) -> VaultResult<BackupJob> {
        let jobs = self.storage.jobs();
        let mut job = jobs.require(job_id)?;
        if job.kind != JobKind::Export {
            return Err(VaultError::InvalidState(format!("job {} is not an export", job.id)));
        }
        let tenant = self
            .storage
            .tenants()
            .get(job.tenant_row_id)?
            .ok_or_else(|| VaultError::tenant_not_found(job.tenant_row_id.to_string()))?;
        let initiator = match job.user_row_id {
            Some(id) => self.storage.users().get(id)?,
            None => None,
        };
        let tenant_id = tenant.public_id.to_uuid_string();

        job.start()?;
        job.set_progress(5, "Preparing export");
        jobs.save(&job)?;
        self.audit.log_or_warn(&AuditEntry::for_job(
            &job,
            &tenant_id,
            AuditAction::ExportStarted,
            json!({
                "include_files": job.include_files(),
                "is_pre_restore": job.is_pre_restore(),
            }),
        ));
        info!(job = %job.id, tenant = %tenant.name, "export started");

        match self.build_archive(&mut job, &tenant, initiator.as_ref()) {
            Ok(outcome) => {
                let archive = outcome.path.clone();
                job.file_path = Some(outcome.path);
                job.file_size = Some(outcome.size);
                job.checksum = Some(outcome.checksum);
                job.complete(outcome.stats)?;
                if let Some(cancelled) = store_terminal(&jobs, &job)? {
                    warn!(job = %job.id, "export cancelled before completion was recorded");
                    if let Err(e) = fs::remove_file(&archive) {
                        warn!(path = %archive.display(), error = %e, "failed to remove archive");
                    }
                    return Ok(cancelled);
                }
                self.audit.log_or_warn(&AuditEntry::for_job(
                    &job,
                    &tenant_id,
                    AuditAction::ExportCompleted,
                    json!({
                        "file_size": job.file_size,
                        "checksum": job.checksum,
                        "stats": job.stats,
                    }),
                ));
                info!(job = %job.id, size = ?job.file_size, "export completed");
                Ok(job)
            }
            Err(VaultError::Cancelled(_)) => {
                warn!(job = %job.id, "export cancelled");
                jobs.require(job.id)
            }
            Err(e) => {
                error!(job = %job.id, error = %e, "export failed");
                job.fail(&e)?;
                if let Some(cancelled) = store_terminal(&jobs, &job)? {
                    return Ok(cancelled);
                }
                self.audit.log_or_warn(&AuditEntry::for_job(
                    &job,
                    &tenant_id,
                    AuditAction::ExportFailed,
                    json!({ "error": e.to_string(), "kind": e.kind() }),
                ));
                Ok(job)
            }
        }
    }

    fn build_archive(
        &self,
        job: &mut BackupJob,
        tenant: &Tenant,
        initiator: Option<&User>,
    ) -> VaultResult<ExportOutcome> {
        let paths = self.storage.paths();
        fs::create_dir_all(paths.tmp_dir())?;
        let staging = tempfile::Builder::new()
            .prefix("export-")
            .tempdir_in(paths.tmp_dir())?;
        let probe = CancelProbe::new(self.storage.db())?;

        let metadata = Metadata {
            backup_version: BACKUP_VERSION.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            tenant_public_id: tenant.public_id.to_uuid_string(),
            tenant_name: tenant.name.clone(),
            schema_version: self.storage.db().schema_fingerprint()?,
            checksum_algo: CHECKSUM_ALGO.to_string(),
            options: [
                ("include_files".to_string(), Value::Bool(job.include_files())),
                ("is_pre_restore".to_string(), Value::Bool(job.is_pre_restore())),
            ]
            .into_iter()
            .collect(),
            created_by: initiator.map(|u| CreatedBy {
                public_id: Some(u.public_id.to_uuid_string()),
                email: Some(u.email.clone()),
            }),
        };
        write_json(&staging.path().join(METADATA_FILE), &metadata)?;

        let mut manifest = Manifest::default();
        let mut stats = Map::new();
        let total = EntityType::ALL.len();

        for (index, entity_type) in EntityType::ALL.into_iter().enumerate() {
            probe.check(self.storage.db().conn(), job.id)?;

            let entry = match self.registry.transformer_for(entity_type) {
                Some(transformer) => self.export_entity(transformer, tenant, staging.path())?,
                None => {
                    debug!(entity = %entity_type, "no transformer registered, skipping");
                    None
                }
            };
            let count = entry.as_ref().map_or(0, |e| e.count);
            stats.insert(entity_type.as_str().to_string(), Value::from(count));
            if let Some(entry) = entry {
                manifest.add_entity(entry);
            }

            let percent = 10 + ((index + 1) * 60 / total) as u8;
            job.set_progress(percent, format!("Exported {}", entity_type));
            self.storage.jobs().save_progress(job)?;
        }

        if job.include_files() {
            probe.check(self.storage.db().conn(), job.id)?;
            job.set_progress(75, "Exporting files");
            self.storage.jobs().save_progress(job)?;
            let missing = self.export_files(tenant, staging.path(), &mut manifest)?;
            stats.insert("files_missing".into(), Value::from(missing));
        }
        stats.insert("files_total".into(), Value::from(manifest.total_files));
        write_json(&staging.path().join(MANIFEST_FILE), &manifest)?;

        probe.check(self.storage.db().conn(), job.id)?;
        job.set_progress(85, "Packaging archive");
        self.storage.jobs().save_progress(job)?;

        let tenant_dir = paths.tenant_archives_dir(&tenant.public_id.to_uuid_string());
        fs::create_dir_all(&tenant_dir)?;
        let packaged = tempfile::Builder::new()
            .prefix("package-")
            .suffix(".zip")
            .tempfile_in(paths.tmp_dir())?;
        package_dir(
            staging.path(),
            packaged.path(),
            self.storage.settings().compression_level,
        )?;
        let checksum = sha256_label(&sha256_file(packaged.path())?);
        let size = fs::metadata(packaged.path())?.len();

        let final_path = tenant_dir.join(format!(
            "backup-{}-{}.zip",
            Utc::now().format("%Y%m%d-%H%M%S"),
            job.id.to_uuid_string()
        ));
        packaged.persist(&final_path).map_err(|e| {
            VaultError::Export(format!("Failed to store archive {}: {}", final_path.display(), e))
        })?;

        Ok(ExportOutcome {
            path: final_path,
            size,
            checksum,
            stats,
        })
    }

    /// Stream one entity type to `data/<type>.ndjson`
    ///
    /// Returns `None` (and leaves no file behind) when the tenant has no rows
    /// of this type.
    fn export_entity(
        &self,
        transformer: &dyn Transformer,
        tenant: &Tenant,
        staging: &Path,
    ) -> VaultResult<Option<EntityEntry>> {
        let entity_type = transformer.entity_type();
        let relative = entity_type.data_file();
        let path = staging.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = HashingWriter::new(BufWriter::new(File::create(&path)?));
        let count = transformer.query(self.storage.db().conn(), tenant, &mut |row| {
            let record = transformer.to_portable(row)?;
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
            Ok(())
        })?;
        let (_, digest, _) = writer.finish()?;

        if count == 0 {
            fs::remove_file(&path)?;
            return Ok(None);
        }
        debug!(entity = %entity_type, count, "entity stream written");
        Ok(Some(EntityEntry {
            entity_type: entity_type.as_str().to_string(),
            file: relative,
            count,
            checksum: sha256_label(&digest),
        }))
    }

    /// Copy every document blob of the tenant into `files/<disk>/<path>`
    ///
    /// Returns the number of blobs that could not be found.
    fn export_files(&self, tenant: &Tenant, staging: &Path, manifest: &mut Manifest) -> VaultResult<u64> {
        let conn = self.storage.db().conn();
        let mut stmt = conn.prepare(
            "SELECT public_id, disk, path FROM documents WHERE tenant_id = ?1 ORDER BY id",
        )?;
        let documents = stmt
            .query_map([tenant.row_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let disks = self.storage.disks();
        let mut missing = 0u64;
        for (public_id, disk, original_path) in documents {
            let member = file_member(&disk, &original_path);
            if is_unsafe_member(&member) {
                warn!(document = %public_id, path = %original_path, "unsafe document path, skipping blob");
                missing += 1;
                continue;
            }
            if !disks.exists(&disk, &original_path) {
                warn!(document = %public_id, disk = %disk, path = %original_path, "document blob missing");
                missing += 1;
                continue;
            }

            let target = staging.join(&member);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut source = disks.open(&disk, &original_path)?;
            let mut writer = HashingWriter::new(BufWriter::new(File::create(&target)?));
            std::io::copy(&mut source, &mut writer)?;
            let (_, digest, size) = writer.finish()?;

            manifest.add_file(FileEntry {
                path: member,
                original_path,
                disk,
                size,
                checksum: sha256_label(&digest),
                entity_type: EntityType::Documents.as_str().to_string(),
                entity_public_id: public_id,
            });
        }
        Ok(missing)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> VaultResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Whether a job is an export that finished with an archive on disk
pub fn has_archive(job: &BackupJob) -> bool {
    job.kind == JobKind::Export
        && job.status == JobStatus::Completed
        && job.file_path.as_deref().is_some_and(Path::exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::ArchiveReader;
    use crate::backup::tests::{create_test_vault, seed_ledger};
    use crate::config::Settings;
    use rusqlite::Connection;

    #[test]
    fn test_export_writes_manifest_and_streams() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let engine = ExportEngine::new(&vault.storage, &vault.registry);

        let job = engine
            .create_export(&tenant, Some(&user), ExportOptions::default())
            .unwrap();
        let job = engine.run_export(job.id).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(has_archive(&job));
        let path = job.file_path.clone().unwrap();
        assert!(path.starts_with(vault.storage.paths().tenant_archives_dir(&tenant.public_id.to_uuid_string())));
        assert_eq!(job.checksum.as_deref(), Some(sha256_label(&sha256_file(&path).unwrap()).as_str()));

        let mut reader = ArchiveReader::open(&path).unwrap();
        let manifest: Manifest =
            serde_json::from_str(&reader.read_string(MANIFEST_FILE).unwrap().unwrap()).unwrap();
        assert_eq!(manifest.entity(EntityType::Accounts).unwrap().count, 3);
        assert_eq!(manifest.entity(EntityType::InvoiceLines).unwrap().count, 2);
        assert!(manifest.entity(EntityType::JournalEntries).is_none());
        assert!(!reader.contains("data/journal_entries.ndjson"));
        assert_eq!(job.stats["accounts"], 3);
        assert_eq!(job.stats["journal_entries"], 0);
        assert_eq!(manifest.total_files, 1);
        assert!(reader.contains("files/local/docs/inv-1.pdf"));
    }

    #[test]
    fn test_export_records_use_public_ids() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let engine = ExportEngine::new(&vault.storage, &vault.registry);
        let job = engine.create_export(&tenant, Some(&user), ExportOptions::default()).unwrap();
        let job = engine.run_export(job.id).unwrap();

        let mut reader = ArchiveReader::open(job.file_path.as_deref().unwrap()).unwrap();
        let lines = reader.read_string("data/invoice_lines.ndjson").unwrap().unwrap();
        for line in lines.lines() {
            let record: Value = serde_json::from_str(line).unwrap();
            assert_eq!(record["invoice_public_id"], "inv-0001");
            assert!(record.get("invoice_id").is_none());
            assert!(record.get("id").is_none());
        }
    }

    #[test]
    fn test_export_without_files() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let engine = ExportEngine::new(&vault.storage, &vault.registry);
        let options = ExportOptions {
            include_files: false,
            ..ExportOptions::default()
        };
        let job = engine.create_export(&tenant, Some(&user), options).unwrap();
        let job = engine.run_export(job.id).unwrap();

        let mut reader = ArchiveReader::open(job.file_path.as_deref().unwrap()).unwrap();
        let manifest: Manifest =
            serde_json::from_str(&reader.read_string(MANIFEST_FILE).unwrap().unwrap()).unwrap();
        assert!(manifest.files.is_empty());
        assert!(reader.member_names().iter().all(|n| !n.starts_with("files/")));
    }

    #[test]
    fn test_missing_blob_is_skipped() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let blob = vault.storage.disks().resolve("local", "docs/inv-1.pdf").unwrap();
        fs::remove_file(blob).unwrap();

        let engine = ExportEngine::new(&vault.storage, &vault.registry);
        let job = engine.create_export(&tenant, Some(&user), ExportOptions::default()).unwrap();
        let job = engine.run_export(job.id).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stats["files_missing"], 1);
        assert_eq!(job.stats["files_total"], 0);
    }

    /// Transformer that cancels the running job when it is queried
    struct CancellingTransformer {
        inner: crate::registry::TableTransformer,
        job_id: JobId,
    }

    impl Transformer for CancellingTransformer {
        fn entity_type(&self) -> EntityType {
            self.inner.entity_type()
        }

        fn query(
            &self,
            conn: &Connection,
            tenant: &Tenant,
            visit: &mut dyn FnMut(crate::storage::Row) -> VaultResult<()>,
        ) -> VaultResult<u64> {
            conn.execute(
                "UPDATE backup_jobs SET status = 'cancelled' WHERE public_id = ?1",
                [self.job_id.to_uuid_string()],
            )?;
            self.inner.query(conn, tenant, visit)
        }

        fn to_portable(&self, row: crate::storage::Row) -> VaultResult<crate::storage::Row> {
            self.inner.to_portable(row)
        }

        fn from_portable(
            &self,
            record: crate::storage::Row,
            mapping: &crate::backup::IdMapping,
            columns: &std::collections::HashSet<String>,
            tenant_row_id: i64,
        ) -> VaultResult<crate::registry::ImportRow> {
            self.inner.from_portable(record, mapping, columns, tenant_row_id)
        }
    }

    #[test]
    fn test_cancelled_export_leaves_no_archive() {
        let (vault, temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);

        let job = ExportEngine::new(&vault.storage, &vault.registry)
            .create_export(&tenant, Some(&user), ExportOptions::default())
            .unwrap();
        let mut registry = Registry::standard();
        registry.register(Box::new(CancellingTransformer {
            inner: crate::registry::TableTransformer::new(EntityType::Accounts),
            job_id: job.id,
        }));

        let job = ExportEngine::new(&vault.storage, &registry)
            .run_export(job.id)
            .unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.file_path.is_none());

        let archives = temp.path().join("archives");
        let stored = walkdir::WalkDir::new(archives)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(stored, 0);
    }

    #[test]
    fn test_failed_export_is_recorded() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        vault
            .storage
            .db()
            .conn()
            .execute("UPDATE accounts SET public_id = '' WHERE code = '1000'", [])
            .unwrap();

        let engine = ExportEngine::new(&vault.storage, &vault.registry);
        let job = engine.create_export(&tenant, Some(&user), ExportOptions::default()).unwrap();
        let job = engine.run_export(job.id).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.file_path.is_none());
        assert_eq!(job.error_details.as_ref().unwrap()["kind"], "export");

        let actions: Vec<AuditAction> = AuditLogger::new(vault.storage.paths().audit_log())
            .read_for_job(job.id)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::ExportStarted, AuditAction::ExportFailed]);
    }
}
