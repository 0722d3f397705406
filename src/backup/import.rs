//! Import engine
//!
//! Uploads are stored untouched, validated without extraction, and
//! imported in a single database transaction. A replace import first takes
//! a pre-restore snapshot of the target tenant. File blobs are restored
//! only after the transaction commits.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use rusqlite::{Connection, Transaction};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::archive::{is_unsafe_member, sha256_file, ArchiveReader, HashingWriter};
use super::export::{ExportEngine, ExportOptions};
use super::manifest::{sha256_label, Manifest, Metadata, MANIFEST_FILE, METADATA_FILE};
use super::mapping::IdMapping;
use super::validate::{validate_archive, ValidationReport};
use super::{store_terminal, CancelProbe};
use crate::audit::{AuditAction, AuditEntry, AuditLogger};
use crate::error::{classify_db_error, VaultError, VaultResult};
use crate::models::{new_public_id, BackupJob, ImportMode, JobId, JobKind, JobStatus, Tenant, User};
use crate::registry::{EntityType, Registry, Transformer};
use crate::storage::rows::{
    delete_tenant_rows, find_tenant_row, insert_row, table_columns, update_row, Row,
};
use crate::storage::Storage;

/// Who is importing into which tenant
struct ImportTarget<'t> {
    tenant: &'t Tenant,
    initiator: Option<&'t User>,
    is_cross_tenant: bool,
}

/// Result of the transactional phase
#[derive(Debug, Default)]
struct RecordOutcome {
    counts: BTreeMap<EntityType, u64>,
    skipped: u64,
}

/// Result of the file restoration phase
#[derive(Debug, Default)]
struct FileOutcome {
    total: u64,
    restored: u64,
    failed: u64,
}

/// Restores tenant archives for import jobs
pub struct ImportEngine<'a> {
    storage: &'a Storage,
    registry: &'a Registry,
    audit: AuditLogger,
}

impl<'a> ImportEngine<'a> {
    pub fn new(storage: &'a Storage, registry: &'a Registry) -> Self {
        Self {
            storage,
            registry,
            audit: AuditLogger::new(storage.paths().audit_log()),
        }
    }

    /// Store an uploaded archive and create a pending import job for it
    ///
    /// The upload is streamed to disk and hashed; it is not parsed. Uploads
    /// larger than the configured limit, or whose length differs from
    /// `declared_size`, are rejected and no job is created.
    pub fn upload_import(
        &self,
        tenant: &Tenant,
        initiator: Option<&User>,
        source: &mut dyn Read,
        declared_size: Option<u64>,
        filename: &str,
    ) -> VaultResult<BackupJob> {
        let max = self.storage.settings().max_upload_bytes;
        if let Some(declared) = declared_size {
            if declared > max {
                return Err(VaultError::Validation(vec![format!(
                    "Upload of {} bytes exceeds the {} byte limit",
                    declared, max
                )]));
            }
        }

        let mut config = Map::new();
        config.insert("original_filename".into(), Value::String(filename.to_string()));
        let mut job = BackupJob::new(
            JobKind::Import,
            tenant.row_id,
            initiator.map(|u| u.row_id),
            config,
        );

        let upload_dir = self
            .storage
            .paths()
            .tenant_uploads_dir(&tenant.public_id.to_uuid_string());
        fs::create_dir_all(&upload_dir)?;
        let temp = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&upload_dir)?;

        let mut writer = HashingWriter::new(temp.as_file());
        let mut limited = Read::take(source, max + 1);
        std::io::copy(&mut limited, &mut writer)?;
        let (_, digest, size) = writer.finish()?;

        if size > max {
            return Err(VaultError::Validation(vec![format!(
                "Upload exceeds the {} byte limit",
                max
            )]));
        }
        if let Some(declared) = declared_size {
            if declared != size {
                return Err(VaultError::Validation(vec![format!(
                    "Upload is {} bytes but {} were declared",
                    size, declared
                )]));
            }
        }

        let path = upload_dir.join(format!("import-{}.zip", job.id.to_uuid_string()));
        temp.persist(&path)
            .map_err(|e| VaultError::Io(format!("Failed to store upload: {}", e)))?;
        job.file_path = Some(path);
        job.file_size = Some(size);
        job.checksum = Some(sha256_label(&digest));
        self.storage.jobs().insert(&job)?;

        self.audit.log_or_warn(&AuditEntry::for_job(
            &job,
            &tenant.public_id.to_uuid_string(),
            AuditAction::ImportUploaded,
            json!({ "filename": filename, "size": size, "checksum": job.checksum }),
        ));
        info!(job = %job.id, size, filename, "import uploaded");
        Ok(job)
    }

    /// Validate a pending import's archive without extracting it
    pub fn validate_import(&self, job_id: JobId) -> VaultResult<ValidationReport> {
        let job = self.storage.jobs().require(job_id)?;
        let tenant = self.job_tenant(&job)?;
        let report = self.validate_for(&job, &tenant)?;

        self.audit.log_or_warn(&AuditEntry::for_job(
            &job,
            &tenant.public_id.to_uuid_string(),
            AuditAction::ImportValidated,
            json!({
                "valid": report.valid,
                "errors": report.errors,
                "warnings": report.warnings,
            }),
        ));
        Ok(report)
    }

    fn validate_for(&self, job: &BackupJob, tenant: &Tenant) -> VaultResult<ValidationReport> {
        if job.kind != JobKind::Import {
            return Err(VaultError::InvalidState(format!("job {} is not an import", job.id)));
        }
        let path = job.file_path.as_deref().ok_or_else(|| {
            VaultError::InvalidState(format!("job {} has no uploaded archive", job.id))
        })?;
        let fingerprint = self.storage.db().schema_fingerprint()?;
        Ok(validate_archive(path, tenant, &fingerprint))
    }

    fn job_tenant(&self, job: &BackupJob) -> VaultResult<Tenant> {
        self.storage
            .tenants()
            .get(job.tenant_row_id)?
            .ok_or_else(|| VaultError::tenant_not_found(job.tenant_row_id.to_string()))
    }

    /// Run a pending import job to a terminal state
    ///
    /// Returns the job as persisted afterwards. A failed import leaves the
    /// tenant's records untouched and is reported through the job's status.
    pub fn run_import(&self, job_id: JobId, mode: ImportMode) -> VaultResult<BackupJob> {
        let jobs = self.storage.jobs();
        let mut job = jobs.require(job_id)?;
        if job.kind != JobKind::Import {
            return Err(VaultError::InvalidState(format!("job {} is not an import", job.id)));
        }
        let tenant = self.job_tenant(&job)?;
        let initiator = match job.user_row_id {
            Some(id) => self.storage.users().get(id)?,
            None => None,
        };
        let tenant_id = tenant.public_id.to_uuid_string();

        job.start()?;
        job.config
            .insert("import_mode".into(), Value::String(mode.as_str().to_string()));
        job.set_progress(5, "Validating archive");
        jobs.save(&job)?;
        self.audit.log_or_warn(&AuditEntry::for_job(
            &job,
            &tenant_id,
            AuditAction::ImportStarted,
            json!({ "mode": mode.as_str() }),
        ));
        info!(job = %job.id, tenant = %tenant.name, mode = %mode.as_str(), "import started");

        match self.execute(&mut job, &tenant, initiator.as_ref(), mode) {
            Ok(stats) => {
                job.complete(stats)?;
                if let Some(cancelled) = store_terminal(&jobs, &job)? {
                    return Ok(cancelled);
                }
                self.audit.log_or_warn(&AuditEntry::for_job(
                    &job,
                    &tenant_id,
                    AuditAction::ImportCompleted,
                    json!({ "stats": job.stats }),
                ));
                info!(job = %job.id, "import completed");
                Ok(job)
            }
            Err(VaultError::Cancelled(_)) => {
                warn!(job = %job.id, "import cancelled, changes rolled back");
                jobs.require(job.id)
            }
            Err(e) => {
                error!(job = %job.id, error = %e, "import failed");
                job.fail(&e)?;
                if let Some(cancelled) = store_terminal(&jobs, &job)? {
                    return Ok(cancelled);
                }
                self.audit.log_or_warn(&AuditEntry::for_job(
                    &job,
                    &tenant_id,
                    AuditAction::ImportFailed,
                    json!({
                        "error": e.to_string(),
                        "kind": e.kind(),
                        "pre_restore_job_id": job.config.get("pre_restore_job_id"),
                    }),
                ));
                Ok(job)
            }
        }
    }

    fn execute(
        &self,
        job: &mut BackupJob,
        tenant: &Tenant,
        initiator: Option<&User>,
        mode: ImportMode,
    ) -> VaultResult<Map<String, Value>> {
        let jobs = self.storage.jobs();
        let probe = CancelProbe::new(self.storage.db())?;

        self.validate_for(job, tenant)?.into_result()?;
        job.set_progress(10, "Archive validated");
        jobs.save_progress(job)?;

        if mode == ImportMode::Replace {
            probe.check(self.storage.db().conn(), job.id)?;
            job.set_progress(15, "Creating pre-restore snapshot");
            jobs.save_progress(job)?;
            let snapshot = self.pre_restore_snapshot(tenant, initiator)?;
            job.config.insert(
                "pre_restore_job_id".into(),
                Value::String(snapshot.id.to_uuid_string()),
            );
            job.set_progress(25, "Pre-restore snapshot created");
            jobs.save_progress(job)?;
            self.audit.log_or_warn(&AuditEntry::for_job(
                job,
                &tenant.public_id.to_uuid_string(),
                AuditAction::PreRestoreSnapshotCreated,
                json!({ "snapshot_job_id": snapshot.id.to_uuid_string() }),
            ));
        }

        probe.check(self.storage.db().conn(), job.id)?;
        job.set_progress(30, "Extracting archive");
        jobs.save_progress(job)?;

        let paths = self.storage.paths();
        fs::create_dir_all(paths.tmp_dir())?;
        let staging = tempfile::Builder::new()
            .prefix("import-")
            .tempdir_in(paths.tmp_dir())?;
        let archive_path = job
            .file_path
            .as_deref()
            .ok_or_else(|| VaultError::InvalidState(format!("job {} has no archive", job.id)))?;
        ArchiveReader::open(archive_path)?.extract_to(staging.path())?;

        let metadata: Metadata = read_json(&staging.path().join(METADATA_FILE))?;
        let manifest: Manifest = read_json(&staging.path().join(MANIFEST_FILE))?;
        let target = ImportTarget {
            tenant,
            initiator,
            is_cross_tenant: metadata.tenant_public_id != tenant.public_id.to_uuid_string(),
        };
        if target.is_cross_tenant {
            info!(source = %metadata.tenant_name, "cross-tenant import, assigning new public ids");
        }

        job.set_progress(35, "Importing records");
        jobs.save_progress(job)?;
        let records = self.import_records(job.id, &target, mode, &manifest, staging.path(), &probe)?;

        job.set_progress(85, "Restoring files");
        jobs.save_progress(job)?;
        let files = self.restore_files(&manifest, staging.path());

        let mut stats = Map::new();
        for entity_type in EntityType::ALL {
            let count = records.counts.get(&entity_type).copied().unwrap_or(0);
            stats.insert(entity_type.as_str().to_string(), Value::from(count));
        }
        stats.insert("records_skipped".into(), Value::from(records.skipped));
        stats.insert("files_total".into(), Value::from(files.total));
        stats.insert("files_restored".into(), Value::from(files.restored));
        stats.insert("files_failed".into(), Value::from(files.failed));
        stats.insert("is_cross_tenant".into(), Value::Bool(target.is_cross_tenant));
        Ok(stats)
    }

    /// Complete export of the target tenant, taken before anything is deleted
    fn pre_restore_snapshot(&self, tenant: &Tenant, initiator: Option<&User>) -> VaultResult<BackupJob> {
        let exporter = ExportEngine::new(self.storage, self.registry);
        let options = ExportOptions {
            include_files: true,
            is_pre_restore: true,
        };
        let snapshot = exporter.create_export(tenant, initiator, options)?;
        let snapshot = exporter.run_export(snapshot.id)?;
        if snapshot.status != JobStatus::Completed {
            return Err(VaultError::Export(format!(
                "pre-restore snapshot {} did not complete: {}",
                snapshot.id,
                snapshot.error_message.as_deref().unwrap_or("unknown error")
            )));
        }
        info!(snapshot = %snapshot.id, "pre-restore snapshot created");
        Ok(snapshot)
    }

    /// Delete (for replace) and re-create the tenant's records in one transaction
    fn import_records(
        &self,
        job_id: JobId,
        target: &ImportTarget<'_>,
        mode: ImportMode,
        manifest: &Manifest,
        staging: &Path,
        probe: &CancelProbe,
    ) -> VaultResult<RecordOutcome> {
        let conn = self.storage.db().conn();
        let mut tx = conn
            .unchecked_transaction()
            .map_err(|e| VaultError::CriticalTransaction(format!("Failed to begin transaction: {}", e)))?;

        if mode == ImportMode::Replace {
            self.clear_tenant(&tx, target)?;
        }

        let mut mapping = IdMapping::new();
        let mut outcome = RecordOutcome::default();

        for entity_type in EntityType::ALL {
            probe.check(conn, job_id)?;

            let Some(entry) = manifest.entity(entity_type) else {
                continue;
            };
            let Some(transformer) = self.registry.transformer_for(entity_type) else {
                warn!(entity = %entity_type, "no transformer registered, records not imported");
                continue;
            };

            let columns = table_columns(&tx, entity_type.table())
                .map_err(|e| classify_db_error(entity_type.as_str(), e))?;
            let file = File::open(staging.join(&entry.file)).map_err(|e| {
                VaultError::CriticalTransaction(format!("Failed to open {}: {}", entry.file, e))
            })?;

            let mut imported = 0u64;
            for (line_no, raw) in BufReader::new(file).split(b'\n').enumerate() {
                let raw = raw.map_err(|e| {
                    VaultError::CriticalTransaction(format!("Failed to read {}: {}", entry.file, e))
                })?;
                let line = match String::from_utf8(raw) {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => Ok(line),
                    Err(e) => Err(VaultError::record(
                        entity_type.as_str(),
                        format!("line {}: {}", line_no + 1, e),
                    )),
                };
                let result = line
                    .and_then(|line| {
                        serde_json::from_str::<Row>(&line).map_err(|e| {
                            VaultError::record(entity_type.as_str(), format!("line {}: {}", line_no + 1, e))
                        })
                    })
                    .and_then(|record| {
                        import_record(&mut tx, transformer, target, record, &mut mapping, &columns)
                    });

                match result {
                    Ok(()) => imported += 1,
                    Err(e) if e.is_critical() => {
                        error!(entity = %entity_type, line = line_no + 1, error = %e, "import aborted");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(entity = %entity_type, line = line_no + 1, error = %e, "record skipped");
                        outcome.skipped += 1;
                    }
                }
            }
            debug!(entity = %entity_type, imported, "entity imported");
            outcome.counts.insert(entity_type, imported);
        }

        probe.check(conn, job_id)?;
        tx.commit()
            .map_err(|e| VaultError::CriticalTransaction(format!("Failed to commit import: {}", e)))?;
        Ok(outcome)
    }

    /// Remove every row of the tenant, newest dependants first
    fn clear_tenant(&self, conn: &Connection, target: &ImportTarget<'_>) -> VaultResult<()> {
        for entity_type in EntityType::ALL.into_iter().rev() {
            let keep = match (entity_type, target.initiator) {
                (EntityType::Users, Some(user)) => Some(user.row_id),
                _ => None,
            };
            let deleted = delete_tenant_rows(conn, entity_type.spec(), target.tenant.row_id, keep)
                .map_err(|e| {
                    VaultError::CriticalTransaction(format!("Failed to clear {}: {}", entity_type, e))
                })?;
            debug!(entity = %entity_type, deleted, "cleared tenant rows");
        }
        Ok(())
    }

    /// Copy manifest file blobs back onto their disks, verifying checksums
    fn restore_files(&self, manifest: &Manifest, staging: &Path) -> FileOutcome {
        let disks = self.storage.disks();
        let mut outcome = FileOutcome {
            total: manifest.files.len() as u64,
            ..FileOutcome::default()
        };

        for file in &manifest.files {
            let result = (|| -> VaultResult<()> {
                if is_unsafe_member(&file.path) {
                    return Err(VaultError::FileRestore {
                        path: file.path.clone(),
                        message: "unsafe archive path".into(),
                    });
                }
                let source = staging.join(&file.path);
                if !source.is_file() {
                    return Err(VaultError::FileRestore {
                        path: file.path.clone(),
                        message: "not present in archive".into(),
                    });
                }
                if sha256_label(&sha256_file(&source)?) != file.checksum {
                    return Err(VaultError::FileRestore {
                        path: file.path.clone(),
                        message: "checksum mismatch".into(),
                    });
                }
                let mut reader = File::open(&source)?;
                disks.write_atomic(&file.disk, &file.original_path, &mut reader)?;
                Ok(())
            })();

            match result {
                Ok(()) => outcome.restored += 1,
                Err(e) => {
                    warn!(path = %file.path, error = %e, "file not restored");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}

/// Write one portable record inside its own savepoint
///
/// The initiating user's own record is never written; it maps onto the
/// existing user instead.
fn import_record(
    tx: &mut Transaction<'_>,
    transformer: &dyn Transformer,
    target: &ImportTarget<'_>,
    record: Row,
    mapping: &mut IdMapping,
    columns: &HashSet<String>,
) -> VaultResult<()> {
    let entity_type = transformer.entity_type();

    if entity_type == EntityType::Users {
        if let Some(user) = target.initiator {
            let public_id = record.get("public_id").and_then(Value::as_str);
            let email = record.get("email").and_then(Value::as_str);
            if user.matches_record(public_id, email) {
                if let Some(public_id) = public_id {
                    mapping.set(EntityType::Users, public_id, user.row_id);
                }
                debug!(user = %user.public_id, "initiating user kept");
                return Ok(());
            }
        }
    }

    let row = transformer.from_portable(record, mapping, columns, target.tenant.row_id)?;
    if !row.dropped.is_empty() {
        debug!(entity = %entity_type, fields = ?row.dropped, "dropped fields unknown to this schema");
    }

    let table = entity_type.table();
    let savepoint = tx
        .savepoint()
        .map_err(|e| classify_db_error(entity_type.as_str(), e))?;

    let existing = if target.is_cross_tenant {
        None
    } else {
        find_tenant_row(&savepoint, entity_type.spec(), target.tenant.row_id, &row.public_id)
            .map_err(|e| classify_db_error(entity_type.as_str(), e))?
    };

    let mut fields = row.fields;
    let written = match existing {
        Some(id) => {
            // re-importing a record brings a soft-deleted row back
            if entity_type.spec().soft_deletes && columns.contains("deleted_at") {
                fields.entry("deleted_at").or_insert(Value::Null);
            }
            update_row(&savepoint, table, id, &fields).map(|_| id)
        }
        None => {
            let public_id = if target.is_cross_tenant {
                new_public_id()
            } else {
                row.public_id.clone()
            };
            fields.insert("public_id".into(), Value::String(public_id));
            insert_row(&savepoint, table, &fields)
        }
    };
    let id = written.map_err(|e| classify_db_error(entity_type.as_str(), e))?;

    savepoint
        .commit()
        .map_err(|e| classify_db_error(entity_type.as_str(), e))?;
    mapping.set(entity_type, &row.public_id, id);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> VaultResult<T> {
    let file = File::open(path)
        .map_err(|e| VaultError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| VaultError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::tests::{build_archive, build_raw_archive, create_test_vault, seed_ledger, TestVault};
    use crate::config::Settings;
    use crate::registry::TableTransformer;
    use crate::storage::rows::count_tenant_rows;
    use std::path::PathBuf;

    fn export_tenant(vault: &TestVault, tenant: &Tenant, user: &User) -> PathBuf {
        let exporter = ExportEngine::new(&vault.storage, &vault.registry);
        let job = exporter
            .create_export(tenant, Some(user), ExportOptions::default())
            .unwrap();
        let job = exporter.run_export(job.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        job.file_path.unwrap()
    }

    fn upload(engine: &ImportEngine<'_>, tenant: &Tenant, user: &User, path: &Path) -> BackupJob {
        let mut file = File::open(path).unwrap();
        engine
            .upload_import(tenant, Some(user), &mut file, None, "archive.zip")
            .unwrap()
    }

    fn count(vault: &TestVault, entity_type: EntityType, tenant: &Tenant) -> u64 {
        count_tenant_rows(vault.storage.db().conn(), entity_type.spec(), tenant.row_id).unwrap()
    }

    #[test]
    fn test_round_trip_replace() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let archive = export_tenant(&vault, &tenant, &user);

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &tenant, &user, &archive);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(engine.validate_import(job.id).unwrap().valid);

        let job = engine.run_import(job.id, ImportMode::Replace).unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        assert_eq!(job.progress, 100);
        assert_eq!(job.stats["users"], 1);
        assert_eq!(job.stats["accounts"], 3);
        assert_eq!(job.stats["contacts"], 1);
        assert_eq!(job.stats["invoices"], 1);
        assert_eq!(job.stats["invoice_lines"], 2);
        assert_eq!(job.stats["documents"], 1);
        assert_eq!(job.stats["records_skipped"], 0);
        assert_eq!(job.stats["files_restored"], 1);
        assert_eq!(job.stats["is_cross_tenant"], false);

        assert_eq!(count(&vault, EntityType::Accounts, &tenant), 3);
        assert_eq!(count(&vault, EntityType::InvoiceLines, &tenant), 2);
        assert_eq!(count(&vault, EntityType::Users, &tenant), 1);

        // The importing user keeps their row
        let kept = vault.storage.users().get(user.row_id).unwrap().unwrap();
        assert_eq!(kept.public_id, user.public_id);

        // Records keep their public ids on a same-tenant restore
        let invoice: String = vault
            .storage
            .db()
            .conn()
            .query_row("SELECT number FROM invoices WHERE public_id = 'inv-0001'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(invoice, "INV-0001");

        let snapshot_id = job.config["pre_restore_job_id"].as_str().unwrap();
        let snapshot = vault
            .storage
            .jobs()
            .require(snapshot_id.parse().unwrap())
            .unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.is_pre_restore());

        let blob = vault.storage.disks().resolve("local", "docs/inv-1.pdf").unwrap();
        assert_eq!(fs::read(blob).unwrap(), b"%PDF-1.4 invoice");
    }

    #[test]
    fn test_round_trip_reproduces_records() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let before = export_tenant(&vault, &tenant, &user);

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &tenant, &user, &before);
        let job = engine.run_import(job.id, ImportMode::Replace).unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        let after = export_tenant(&vault, &tenant, &user);

        let mut before = ArchiveReader::open(&before).unwrap();
        let mut after = ArchiveReader::open(&after).unwrap();
        for entity_type in EntityType::ALL {
            let member = entity_type.data_file();
            assert_eq!(
                before.read_string(&member).unwrap(),
                after.read_string(&member).unwrap(),
                "{}",
                member
            );
        }
    }

    #[test]
    fn test_stats_match_manifest_counts() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let archive = export_tenant(&vault, &tenant, &user);
        let mut reader = ArchiveReader::open(&archive).unwrap();
        let manifest: Manifest =
            serde_json::from_str(&reader.read_string(MANIFEST_FILE).unwrap().unwrap()).unwrap();

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &tenant, &user, &archive);
        let job = engine.run_import(job.id, ImportMode::Merge).unwrap();

        for entry in &manifest.entities {
            assert_eq!(job.stats[&entry.entity_type], entry.count, "{}", entry.entity_type);
        }
    }

    #[test]
    fn test_cross_tenant_import_gets_new_identifiers() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (acme, owner) = seed_ledger(&vault.storage);
        let archive = export_tenant(&vault, &acme, &owner);

        let beta = vault.storage.tenants().create("Beta").unwrap();
        let admin = vault
            .storage
            .users()
            .create(&beta, "admin@beta.test", "Beta Admin")
            .unwrap();

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &beta, &admin, &archive);
        let report = engine.validate_import(job.id).unwrap();
        assert!(report.valid);
        assert!(report.info.is_cross_tenant);

        let job = engine.run_import(job.id, ImportMode::Replace).unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        assert_eq!(job.stats["is_cross_tenant"], true);

        // Source tenant untouched
        assert_eq!(count(&vault, EntityType::Accounts, &acme), 3);
        assert_eq!(count(&vault, EntityType::InvoiceLines, &acme), 2);
        // Target got its own copies
        assert_eq!(count(&vault, EntityType::Accounts, &beta), 3);
        assert_eq!(count(&vault, EntityType::InvoiceLines, &beta), 2);
        assert_eq!(count(&vault, EntityType::Users, &beta), 2);
        assert!(vault.storage.users().get(admin.row_id).unwrap().is_some());

        let conn = vault.storage.db().conn();
        let shared: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM accounts a JOIN accounts b ON a.public_id = b.public_id \
                 WHERE a.tenant_id = ?1 AND b.tenant_id = ?2",
                rusqlite::params![acme.row_id, beta.row_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(shared, 0);

        // Foreign keys point at the target tenant's rows
        let stray: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM invoice_lines l \
                 JOIN invoices i ON i.id = l.invoice_id \
                 JOIN accounts a ON a.id = l.account_id \
                 WHERE i.tenant_id = ?1 AND a.tenant_id != ?1",
                [beta.row_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stray, 0);
        let lines: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM invoice_lines l JOIN invoices i ON i.id = l.invoice_id \
                 WHERE i.tenant_id = ?1",
                [beta.row_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(lines, 2);
    }

    #[test]
    fn test_critical_error_rolls_back_everything() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let fingerprint = vault.storage.db().schema_fingerprint().unwrap();
        let archive = build_archive(
            vault.storage.paths().tmp_dir().as_path(),
            &tenant,
            &fingerprint,
            &[(
                "accounts",
                vec![
                    json!({"public_id": "acc-new-1", "code": "9000", "name": "One", "kind": "asset"}),
                    json!({"public_id": "acc-new-2", "code": "9000", "name": "Two", "kind": "asset"}),
                ],
            )],
            &[],
        );

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &tenant, &user, &archive);
        let job = engine.run_import(job.id, ImportMode::Replace).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_details.as_ref().unwrap()["kind"], "critical_transaction");
        assert_eq!(count(&vault, EntityType::Accounts, &tenant), 3);
        assert_eq!(count(&vault, EntityType::Invoices, &tenant), 1);
        assert_eq!(count(&vault, EntityType::Documents, &tenant), 1);

        // The snapshot taken before the failed restore is kept
        let snapshot_id = job.config["pre_restore_job_id"].as_str().unwrap();
        let snapshot = vault
            .storage
            .jobs()
            .require(snapshot_id.parse().unwrap())
            .unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.file_path.unwrap().exists());

        let actions: Vec<AuditAction> = AuditLogger::new(vault.storage.paths().audit_log())
            .read_for_job(job.id)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions.last(), Some(&AuditAction::ImportFailed));
    }

    #[test]
    fn test_record_errors_are_skipped() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let fingerprint = vault.storage.db().schema_fingerprint().unwrap();
        let archive = build_archive(
            vault.storage.paths().tmp_dir().as_path(),
            &tenant,
            &fingerprint,
            &[
                (
                    "accounts",
                    vec![json!({"public_id": "acc-1000", "code": "1000", "name": "Cash and Bank", "kind": "asset"})],
                ),
                (
                    "invoice_lines",
                    vec![json!({"public_id": "inl-9", "invoice_public_id": "inv-missing", "description": "Orphan"})],
                ),
            ],
            &[],
        );

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &tenant, &user, &archive);
        let job = engine.run_import(job.id, ImportMode::Merge).unwrap();

        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        assert_eq!(job.stats["accounts"], 1);
        assert_eq!(job.stats["invoice_lines"], 0);
        assert_eq!(job.stats["records_skipped"], 1);
        assert!(job.config.get("pre_restore_job_id").is_none());

        let name: String = vault
            .storage
            .db()
            .conn()
            .query_row("SELECT name FROM accounts WHERE public_id = 'acc-1000'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Cash and Bank");
        assert_eq!(count(&vault, EntityType::Accounts, &tenant), 3);
        assert_eq!(count(&vault, EntityType::InvoiceLines, &tenant), 2);
    }

    #[test]
    fn test_undecodable_line_is_skipped() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let fingerprint = vault.storage.db().schema_fingerprint().unwrap();

        let mut body = json!({"public_id": "acc-5000", "code": "5000", "name": "Rent", "kind": "expense"})
            .to_string()
            .into_bytes();
        body.push(b'\n');
        body.extend_from_slice(b"{\"public_id\": \"acc-6000\", \"name\": \"\xff\xfe\"}\n");
        let archive = build_raw_archive(
            vault.storage.paths().tmp_dir().as_path(),
            &tenant,
            &fingerprint,
            &[("accounts", body, 2)],
        );

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &tenant, &user, &archive);
        let job = engine.run_import(job.id, ImportMode::Merge).unwrap();

        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        assert_eq!(job.stats["accounts"], 1);
        assert_eq!(job.stats["records_skipped"], 1);
        assert_eq!(count(&vault, EntityType::Accounts, &tenant), 4);
    }

    #[test]
    fn test_reimport_restores_soft_deleted_rows() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let archive = export_tenant(&vault, &tenant, &user);
        let conn = vault.storage.db().conn();
        let soft_delete = || {
            conn.execute(
                "UPDATE accounts SET deleted_at = '2024-06-01T00:00:00Z' WHERE public_id = 'acc-1000'",
                [],
            )
            .unwrap();
        };
        let deleted_at = || -> Option<String> {
            conn.query_row("SELECT deleted_at FROM accounts WHERE public_id = 'acc-1000'", [], |r| r.get(0))
                .unwrap()
        };
        let engine = ImportEngine::new(&vault.storage, &vault.registry);

        soft_delete();
        let job = upload(&engine, &tenant, &user, &archive);
        let job = engine.run_import(job.id, ImportMode::Merge).unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        assert_eq!(deleted_at(), None);

        // records from an archive that predates the deleted_at column
        soft_delete();
        let fingerprint = vault.storage.db().schema_fingerprint().unwrap();
        let archive = build_archive(
            vault.storage.paths().tmp_dir().as_path(),
            &tenant,
            &fingerprint,
            &[(
                "accounts",
                vec![json!({"public_id": "acc-1000", "code": "1000", "name": "Cash", "kind": "asset"})],
            )],
            &[],
        );
        let job = upload(&engine, &tenant, &user, &archive);
        let job = engine.run_import(job.id, ImportMode::Merge).unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        assert_eq!(job.stats["accounts"], 1);
        assert_eq!(deleted_at(), None);
    }

    #[test]
    fn test_path_traversal_archive_is_rejected() {
        let (vault, temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let fingerprint = vault.storage.db().schema_fingerprint().unwrap();
        let archive = build_archive(
            vault.storage.paths().tmp_dir().as_path(),
            &tenant,
            &fingerprint,
            &[],
            &[("../../etc/passwd", "root:x:0:0")],
        );

        let engine = ImportEngine::new(&vault.storage, &vault.registry);
        let job = upload(&engine, &tenant, &user, &archive);
        let report = engine.validate_import(job.id).unwrap();
        assert!(!report.valid);

        let job = engine.run_import(job.id, ImportMode::Replace).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_details.as_ref().unwrap()["kind"], "validation");
        assert!(job.config.get("pre_restore_job_id").is_none());
        assert!(!temp.path().join("etc/passwd").exists());
        assert!(!temp.path().parent().unwrap().join("etc/passwd").exists());
        assert_eq!(count(&vault, EntityType::Accounts, &tenant), 3);
    }

    #[test]
    fn test_upload_limits() {
        let settings = Settings {
            max_upload_bytes: 16,
            ..Settings::default()
        };
        let (vault, _temp) = create_test_vault(settings);
        let (tenant, user) = seed_ledger(&vault.storage);
        let engine = ImportEngine::new(&vault.storage, &vault.registry);

        let mut oversized: &[u8] = &[0u8; 64];
        let result = engine.upload_import(&tenant, Some(&user), &mut oversized, None, "big.zip");
        assert!(matches!(result, Err(VaultError::Validation(_))));

        let mut short: &[u8] = b"0123456789";
        let result = engine.upload_import(&tenant, Some(&user), &mut short, Some(12), "short.zip");
        assert!(matches!(result, Err(VaultError::Validation(_))));

        assert!(vault.storage.jobs().list_for_tenant(tenant.row_id).unwrap().is_empty());
        let leftovers = fs::read_dir(
            vault
                .storage
                .paths()
                .tenant_uploads_dir(&tenant.public_id.to_uuid_string()),
        )
        .unwrap()
        .count();
        assert_eq!(leftovers, 0);
    }

    /// Cancels an import job whenever accounts are exported
    struct CancellingQuery {
        inner: TableTransformer,
        import_job: JobId,
    }

    impl Transformer for CancellingQuery {
        fn entity_type(&self) -> EntityType {
            self.inner.entity_type()
        }

        fn query(
            &self,
            conn: &Connection,
            tenant: &Tenant,
            visit: &mut dyn FnMut(Row) -> VaultResult<()>,
        ) -> VaultResult<u64> {
            conn.execute(
                "UPDATE backup_jobs SET status = 'cancelled' WHERE public_id = ?1",
                [self.import_job.to_uuid_string()],
            )?;
            self.inner.query(conn, tenant, visit)
        }

        fn to_portable(&self, row: Row) -> VaultResult<Row> {
            self.inner.to_portable(row)
        }

        fn from_portable(
            &self,
            record: Row,
            mapping: &IdMapping,
            columns: &HashSet<String>,
            tenant_row_id: i64,
        ) -> VaultResult<crate::registry::ImportRow> {
            self.inner.from_portable(record, mapping, columns, tenant_row_id)
        }
    }

    #[test]
    fn test_cancelled_import_changes_nothing() {
        let (vault, _temp) = create_test_vault(Settings::default());
        let (tenant, user) = seed_ledger(&vault.storage);
        let archive = export_tenant(&vault, &tenant, &user);
        let job = upload(
            &ImportEngine::new(&vault.storage, &vault.registry),
            &tenant,
            &user,
            &archive,
        );

        let mut registry = Registry::standard();
        registry.register(Box::new(CancellingQuery {
            inner: TableTransformer::new(EntityType::Accounts),
            import_job: job.id,
        }));
        let job = ImportEngine::new(&vault.storage, &registry)
            .run_import(job.id, ImportMode::Replace)
            .unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(count(&vault, EntityType::Accounts, &tenant), 3);
        assert_eq!(count(&vault, EntityType::Documents, &tenant), 1);
    }
}
