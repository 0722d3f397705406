//! Append-only JSONL audit log of backup job events
//!
//! Engines append one line per job event. Readers stream the file and keep
//! only what they need, so a long-lived log is never loaded whole.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use tracing::warn;

use crate::error::{VaultError, VaultResult};
use crate::models::JobId;

use super::entry::AuditEntry;

/// The newest entries matching a query
#[derive(Debug, Default)]
pub struct AuditTail {
    /// Oldest first
    pub entries: Vec<AuditEntry>,
    /// Matching entries in the whole log
    pub matched: usize,
    /// Lines that could not be parsed, e.g. torn by a crash mid-write
    pub unreadable: usize,
}

/// Writes and queries the audit log file
#[derive(Debug, Clone)]
pub struct AuditLogger {
    log_path: PathBuf,
}

impl AuditLogger {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append an entry as one JSON line and flush it
    pub fn log(&self, entry: &AuditEntry) -> VaultResult<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| VaultError::Json(format!("Failed to serialize audit entry: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| VaultError::Io(format!("Failed to open audit log: {}", e)))?;
        writeln!(file, "{}", json)
            .and_then(|_| file.flush())
            .map_err(|e| VaultError::Io(format!("Failed to write audit entry: {}", e)))
    }

    /// Log an entry, reporting rather than propagating a write failure
    ///
    /// Used on engine paths where the job outcome must not depend on the
    /// audit log being writable.
    pub fn log_or_warn(&self, entry: &AuditEntry) {
        if let Err(e) = self.log(entry) {
            warn!(job = %entry.job_id, action = %entry.action, error = %e, "audit write failed");
        }
    }

    /// All entries for one job, oldest first
    pub fn read_for_job(&self, job_id: JobId) -> VaultResult<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        self.scan(|entry| {
            if entry.job_id == job_id {
                entries.push(entry);
            }
        })?;
        Ok(entries)
    }

    /// The last `limit` entries, optionally only those of one job
    pub fn tail(&self, job_id: Option<JobId>, limit: usize) -> VaultResult<AuditTail> {
        let mut window = VecDeque::with_capacity(limit.min(1024));
        let mut matched = 0;
        let unreadable = self.scan(|entry| {
            if job_id.is_some_and(|id| id != entry.job_id) {
                return;
            }
            matched += 1;
            if limit == 0 {
                return;
            }
            if window.len() == limit {
                window.pop_front();
            }
            window.push_back(entry);
        })?;

        Ok(AuditTail {
            entries: window.into(),
            matched,
            unreadable,
        })
    }

    /// Feed every parseable entry to `visit`, returning how many lines were
    /// skipped as unreadable
    fn scan(&self, mut visit: impl FnMut(AuditEntry)) -> VaultResult<usize> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(VaultError::Io(format!("Failed to open audit log: {}", e))),
        };

        let mut unreadable = 0;
        for (line_no, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line.map_err(|e| {
                VaultError::Io(format!("Failed to read audit log line {}: {}", line_no + 1, e))
            })?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<AuditEntry>(&line) {
                Ok(entry) => visit(entry),
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "unreadable audit entry skipped");
                    unreadable += 1;
                }
            }
        }
        Ok(unreadable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::AuditAction;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_logger() -> (AuditLogger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");
        let logger = AuditLogger::new(log_path);
        (logger, temp_dir)
    }

    #[test]
    fn test_read_for_job() {
        let (logger, _temp) = create_test_logger();
        let first = JobId::new();
        let second = JobId::new();

        logger.log(&AuditEntry::new(first, AuditAction::ImportUploaded, json!({}))).unwrap();
        logger.log(&AuditEntry::new(second, AuditAction::ExportStarted, json!({}))).unwrap();
        logger.log(&AuditEntry::new(first, AuditAction::ImportValidated, json!({}))).unwrap();

        let actions: Vec<AuditAction> = logger
            .read_for_job(first)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::ImportUploaded, AuditAction::ImportValidated]);
    }

    #[test]
    fn test_tail_keeps_newest() {
        let (logger, _temp) = create_test_logger();
        for i in 0..10 {
            let entry = AuditEntry::new(JobId::new(), AuditAction::ExportCompleted, json!({"index": i}));
            logger.log(&entry).unwrap();
        }

        let tail = logger.tail(None, 3).unwrap();
        assert_eq!(tail.matched, 10);
        assert_eq!(tail.entries.len(), 3);
        assert_eq!(tail.entries[0].payload["index"], 7);
        assert_eq!(tail.entries[2].payload["index"], 9);
    }

    #[test]
    fn test_tail_for_one_job() {
        let (logger, _temp) = create_test_logger();
        let job = JobId::new();
        logger.log(&AuditEntry::new(job, AuditAction::ExportStarted, json!({}))).unwrap();
        logger.log(&AuditEntry::new(JobId::new(), AuditAction::ExportStarted, json!({}))).unwrap();
        logger.log(&AuditEntry::new(job, AuditAction::ExportCompleted, json!({}))).unwrap();

        let tail = logger.tail(Some(job), 1).unwrap();
        assert_eq!(tail.matched, 2);
        assert_eq!(tail.entries.len(), 1);
        assert_eq!(tail.entries[0].action, AuditAction::ExportCompleted);
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let (logger, temp) = create_test_logger();
        logger
            .log(&AuditEntry::new(JobId::new(), AuditAction::ArchiveDeleted, json!(null)))
            .unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(temp.path().join("audit.log"))
            .unwrap();
        write!(file, "{{\"timestamp\":\"2024-").unwrap();

        let reopened = AuditLogger::new(temp.path().join("audit.log"));
        let tail = reopened.tail(None, 50).unwrap();
        assert_eq!(tail.matched, 1);
        assert_eq!(tail.unreadable, 1);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let (logger, _temp) = create_test_logger();

        let tail = logger.tail(None, 50).unwrap();
        assert_eq!(tail.matched, 0);
        assert!(tail.entries.is_empty());
        assert!(logger.read_for_job(JobId::new()).unwrap().is_empty());
    }
}
