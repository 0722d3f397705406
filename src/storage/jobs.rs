//! Backup job repository
//!
//! Persists [`BackupJob`] records in the `backup_jobs` table. Jobs are keyed
//! by their public job id; config, stats and error details are stored as
//! JSON text.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::error::{VaultError, VaultResult};
use crate::models::{BackupJob, JobId, JobKind, JobStatus};

const JOB_COLUMNS: &str = "public_id, tenant_id, user_id, kind, status, progress, current_step, \
     file_path, file_size, checksum, config, stats, error_message, error_details, \
     created_at, updated_at, started_at, completed_at";

/// Repository for backup job persistence
pub struct JobRepository<'a> {
    conn: &'a Connection,
}

impl<'a> JobRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a newly created job
    pub fn insert(&self, job: &BackupJob) -> VaultResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO backup_jobs ({JOB_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                job.id.to_uuid_string(),
                job.tenant_row_id,
                job.user_row_id,
                job.kind.as_str(),
                job.status.as_str(),
                job.progress,
                job.current_step,
                job.file_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                job.file_size.map(|s| s as i64),
                job.checksum,
                serde_json::to_string(&job.config)?,
                serde_json::to_string(&job.stats)?,
                job.error_message,
                job.error_details.as_ref().map(Value::to_string),
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Write every mutable field of an existing job
    ///
    /// A job someone else cancelled stays cancelled: the write is refused
    /// with [`VaultError::Cancelled`] unless `job` is itself the cancellation.
    pub fn save(&self, job: &BackupJob) -> VaultResult<()> {
        let updated = self.conn.execute(
            "UPDATE backup_jobs SET user_id = ?2, status = ?3, progress = ?4, current_step = ?5, \
             file_path = ?6, file_size = ?7, checksum = ?8, config = ?9, stats = ?10, \
             error_message = ?11, error_details = ?12, updated_at = ?13, started_at = ?14, \
             completed_at = ?15 \
             WHERE public_id = ?1 AND (status != 'cancelled' OR ?3 = 'cancelled')",
            params![
                job.id.to_uuid_string(),
                job.user_row_id,
                job.status.as_str(),
                job.progress,
                job.current_step,
                job.file_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                job.file_size.map(|s| s as i64),
                job.checksum,
                serde_json::to_string(&job.config)?,
                serde_json::to_string(&job.stats)?,
                job.error_message,
                job.error_details.as_ref().map(Value::to_string),
                job.updated_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        if updated == 0 {
            if self.is_cancelled(job.id)? {
                return Err(VaultError::Cancelled(job.id.to_string()));
            }
            return Err(VaultError::job_not_found(job.id.to_string()));
        }
        Ok(())
    }

    /// Write progress, step label and config only, leaving status alone
    pub fn save_progress(&self, job: &BackupJob) -> VaultResult<()> {
        self.conn.execute(
            "UPDATE backup_jobs SET progress = MAX(progress, ?2), current_step = ?3, config = ?4, \
             updated_at = ?5 WHERE public_id = ?1",
            params![
                job.id.to_uuid_string(),
                job.progress,
                job.current_step,
                serde_json::to_string(&job.config)?,
                job.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a job by id
    pub fn get(&self, id: JobId) -> VaultResult<Option<BackupJob>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM backup_jobs WHERE public_id = ?1"),
                [id.to_uuid_string()],
                RawJob::from_row,
            )
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    /// Get a job by id, failing if it does not exist
    pub fn require(&self, id: JobId) -> VaultResult<BackupJob> {
        self.get(id)?
            .ok_or_else(|| VaultError::job_not_found(id.to_string()))
    }

    /// All jobs of a tenant, newest first
    pub fn list_for_tenant(&self, tenant_row_id: i64) -> VaultResult<Vec<BackupJob>> {
        self.query_list(
            &format!(
                "SELECT {JOB_COLUMNS} FROM backup_jobs WHERE tenant_id = ?1 ORDER BY id DESC"
            ),
            Some(tenant_row_id),
        )
    }

    /// Every job, newest first
    pub fn list_all(&self) -> VaultResult<Vec<BackupJob>> {
        self.query_list(
            &format!("SELECT {JOB_COLUMNS} FROM backup_jobs ORDER BY id DESC"),
            None,
        )
    }

    fn query_list(&self, sql: &str, tenant_row_id: Option<i64>) -> VaultResult<Vec<BackupJob>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raws = match tenant_row_id {
            Some(tenant) => stmt
                .query_map([tenant], RawJob::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], RawJob::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        raws.into_iter().map(RawJob::into_job).collect()
    }

    /// Whether the tenant already has a pending or processing job of `kind`
    ///
    /// Callers check this before creating a job; the engines do not.
    pub fn has_active_job(&self, tenant_row_id: i64, kind: JobKind) -> VaultResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM backup_jobs WHERE tenant_id = ?1 AND kind = ?2 \
             AND status IN ('pending', 'processing')",
            params![tenant_row_id, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether someone has cancelled the job since it was loaded
    pub fn is_cancelled(&self, id: JobId) -> VaultResult<bool> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM backup_jobs WHERE public_id = ?1",
                [id.to_uuid_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref() == Some(JobStatus::Cancelled.as_str()))
    }
}

/// Column values as read from SQLite, before JSON and enum parsing
struct RawJob {
    public_id: String,
    tenant_id: i64,
    user_id: Option<i64>,
    kind: String,
    status: String,
    progress: i64,
    current_step: Option<String>,
    file_path: Option<String>,
    file_size: Option<i64>,
    checksum: Option<String>,
    config: String,
    stats: String,
    error_message: Option<String>,
    error_details: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RawJob {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            public_id: row.get(0)?,
            tenant_id: row.get(1)?,
            user_id: row.get(2)?,
            kind: row.get(3)?,
            status: row.get(4)?,
            progress: row.get(5)?,
            current_step: row.get(6)?,
            file_path: row.get(7)?,
            file_size: row.get(8)?,
            checksum: row.get(9)?,
            config: row.get(10)?,
            stats: row.get(11)?,
            error_message: row.get(12)?,
            error_details: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            started_at: row.get(16)?,
            completed_at: row.get(17)?,
        })
    }

    fn into_job(self) -> VaultResult<BackupJob> {
        let id = JobId::parse(&self.public_id)
            .map_err(|e| VaultError::Database(format!("Invalid job id: {}", e)))?;
        let kind = JobKind::parse(&self.kind)
            .ok_or_else(|| VaultError::Database(format!("Unknown job kind: {}", self.kind)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| VaultError::Database(format!("Unknown job status: {}", self.status)))?;

        Ok(BackupJob {
            id,
            tenant_row_id: self.tenant_id,
            user_row_id: self.user_id,
            kind,
            status,
            progress: self.progress.clamp(0, 100) as u8,
            current_step: self.current_step,
            file_path: self.file_path.map(PathBuf::from),
            file_size: self.file_size.map(|s| s as u64),
            checksum: self.checksum,
            config: parse_map(&self.config)?,
            stats: parse_map(&self.stats)?,
            error_message: self.error_message,
            error_details: self
                .error_details
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            started_at: self.started_at.as_deref().map(parse_time).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

fn parse_map(raw: &str) -> VaultResult<Map<String, Value>> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_time(raw: &str) -> VaultResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| VaultError::Database(format!("Invalid timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, TenantRepository};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantRepository::new(db.conn()).create("Acme").unwrap();
        (db, tenant.row_id)
    }

    #[test]
    fn test_insert_and_get() {
        let (db, tenant) = setup();
        let repo = JobRepository::new(db.conn());

        let mut config = Map::new();
        config.insert("include_files".into(), Value::Bool(false));
        let job = BackupJob::new(JobKind::Export, tenant, None, config);
        repo.insert(&job).unwrap();

        let loaded = repo.require(job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.kind, JobKind::Export);
        assert!(!loaded.include_files());
    }

    #[test]
    fn test_save_persists_transitions() {
        let (db, tenant) = setup();
        let repo = JobRepository::new(db.conn());
        let mut job = BackupJob::new(JobKind::Export, tenant, None, Map::new());
        repo.insert(&job).unwrap();

        job.start().unwrap();
        job.set_progress(30, "Exporting accounts");
        repo.save(&job).unwrap();

        let loaded = repo.require(job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.progress, 30);
        assert_eq!(loaded.current_step.as_deref(), Some("Exporting accounts"));
        assert!(loaded.started_at.is_some());
    }

    #[test]
    fn test_has_active_job() {
        let (db, tenant) = setup();
        let repo = JobRepository::new(db.conn());
        assert!(!repo.has_active_job(tenant, JobKind::Export).unwrap());

        let mut job = BackupJob::new(JobKind::Export, tenant, None, Map::new());
        repo.insert(&job).unwrap();
        assert!(repo.has_active_job(tenant, JobKind::Export).unwrap());
        assert!(!repo.has_active_job(tenant, JobKind::Import).unwrap());

        job.cancel("not needed").unwrap();
        repo.save(&job).unwrap();
        assert!(!repo.has_active_job(tenant, JobKind::Export).unwrap());
        assert!(repo.is_cancelled(job.id).unwrap());
    }

    #[test]
    fn test_save_does_not_undo_cancellation() {
        let (db, tenant) = setup();
        let repo = JobRepository::new(db.conn());
        let mut running = BackupJob::new(JobKind::Import, tenant, None, Map::new());
        repo.insert(&running).unwrap();
        running.start().unwrap();
        repo.save(&running).unwrap();

        let mut cancelled = repo.require(running.id).unwrap();
        cancelled.cancel("operator request").unwrap();
        repo.save(&cancelled).unwrap();

        running.set_progress(50, "Importing records");
        repo.save_progress(&running).unwrap();
        running.complete(Map::new()).unwrap();
        let err = repo.save(&running).unwrap_err();
        assert!(matches!(err, VaultError::Cancelled(_)));

        let stored = repo.require(running.id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.progress, 50);
    }

    #[test]
    fn test_missing_job() {
        let (db, _) = setup();
        let repo = JobRepository::new(db.conn());
        assert!(repo.get(JobId::new()).unwrap().is_none());
        assert!(repo.require(JobId::new()).unwrap_err().is_not_found());
    }
}
