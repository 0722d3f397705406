//! Storage layer for tenant-vault
//!
//! An embedded SQLite database holds the tenant ledger tables and the backup
//! job table; named disks hold document blobs.

pub mod database;
pub mod disks;
pub mod jobs;
pub mod rows;
pub mod schema;
pub mod tenants;

pub use database::Database;
pub use disks::DiskRegistry;
pub use jobs::JobRepository;
pub use rows::Row;
pub use tenants::{TenantRepository, UserRepository};

use crate::config::{Settings, VaultPaths};
use crate::error::VaultResult;

/// Main storage coordinator that provides access to all repositories
pub struct Storage {
    paths: VaultPaths,
    settings: Settings,
    db: Database,
    disks: DiskRegistry,
}

impl Storage {
    /// Open storage under `paths`, creating directories and tables as needed
    pub fn open(paths: VaultPaths, settings: Settings) -> VaultResult<Self> {
        paths.ensure_directories()?;
        let db = Database::open(&paths.database_file())?;
        let disks = DiskRegistry::new(&paths, &settings);

        Ok(Self {
            paths,
            settings,
            db,
            disks,
        })
    }

    /// Get the paths configuration
    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn disks(&self) -> &DiskRegistry {
        &self.disks
    }

    pub fn jobs(&self) -> JobRepository<'_> {
        JobRepository::new(self.db.conn())
    }

    pub fn tenants(&self) -> TenantRepository<'_> {
        TenantRepository::new(self.db.conn())
    }

    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(self.db.conn())
    }
}
