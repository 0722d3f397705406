//! SQLite connection handling
//!
//! One connection serves both the ledger tables and the backup job table.
//! Foreign keys are enforced so an import cannot leave dangling references.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use sha2::{Digest, Sha256};

use super::schema::SCHEMA_SQL;
use crate::error::{VaultError, VaultResult};
use crate::registry::EntityType;

/// Owned database connection
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: &Path) -> VaultResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            VaultError::Database(format!("Failed to open {}: {}", path.display(), e))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000i64)?;
        Self::configure(conn, Some(path.to_path_buf()))
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> VaultResult<Self> {
        Self::configure(Connection::open_in_memory()?, None)
    }

    fn configure(conn: Connection, path: Option<PathBuf>) -> VaultResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self { conn, path };
        db.migrate()?;
        Ok(db)
    }

    /// Create any missing tables
    pub fn migrate(&self) -> VaultResult<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .map_err(|e| VaultError::Database(format!("Failed to apply schema: {}", e)))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Database file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Separate read-only connection to the same file
    ///
    /// Sees changes committed by other connections even while this one is
    /// inside a transaction.
    pub fn open_reader(&self) -> VaultResult<Option<Connection>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "busy_timeout", 5000i64)?;
        Ok(Some(conn))
    }

    /// Coarse fingerprint of the managed tables' definitions
    ///
    /// Two databases with the same fingerprint accept each other's records
    /// without any field being dropped.
    pub fn schema_fingerprint(&self) -> VaultResult<String> {
        let mut stmt = self
            .conn
            .prepare("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1")?;

        let mut hasher = Sha256::new();
        for entity in EntityType::ALL {
            let sql: Option<String> = stmt
                .query_row([entity.table()], |row| row.get(0))
                .optional()?;
            hasher.update(entity.table().as_bytes());
            hasher.update(b"\n");
            hasher.update(normalize_sql(sql.as_deref().unwrap_or_default()).as_bytes());
            hasher.update(b"\n");
        }

        Ok(hex::encode(hasher.finalize())[..16].to_string())
    }
}

/// Collapse whitespace so formatting changes don't alter the fingerprint
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_tables() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'invoice_lines'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_file_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vault.db");

        let first = Database::open(&path).unwrap().schema_fingerprint().unwrap();
        let second = Database::open(&path).unwrap().schema_fingerprint().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fingerprint_changes_with_schema() {
        let db = Database::open_in_memory().unwrap();
        let before = db.schema_fingerprint().unwrap();

        db.conn()
            .execute_batch("ALTER TABLE contacts ADD COLUMN phone TEXT;")
            .unwrap();

        assert_ne!(before, db.schema_fingerprint().unwrap());
        assert_eq!(before.len(), 16);
    }

    #[test]
    fn test_fingerprint_with_missing_table() {
        let db = Database::open_in_memory().unwrap();
        let before = db.schema_fingerprint().unwrap();

        db.conn().execute_batch("DROP TABLE documents;").unwrap();

        let after = db.schema_fingerprint().unwrap();
        assert_ne!(before, after);
        assert_eq!(after.len(), 16);
    }
}
