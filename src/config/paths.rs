//! Path management for tenant-vault
//!
//! Provides XDG-compliant path resolution for the database, archives,
//! uploads, storage disks and the audit log.
//!
//! ## Path Resolution Order
//!
//! 1. `TENANT_VAULT_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/tenant-vault` or `~/.config/tenant-vault`
//! 3. Windows: `%APPDATA%\tenant-vault`

use std::path::PathBuf;

use crate::error::VaultError;

/// Manages all paths used by tenant-vault
#[derive(Debug, Clone)]
pub struct VaultPaths {
    /// Base directory for all tenant-vault data
    base_dir: PathBuf,
}

impl VaultPaths {
    /// Create a new VaultPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, VaultError> {
        let base_dir = if let Ok(custom) = std::env::var("TENANT_VAULT_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create VaultPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Path to the SQLite database holding tenant data and backup jobs
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("vault.db")
    }

    /// Durable archive storage (`archives/<tenant>/...`)
    pub fn archives_dir(&self) -> PathBuf {
        self.base_dir.join("archives")
    }

    /// Archive directory for a single tenant
    pub fn tenant_archives_dir(&self, tenant_public_id: &str) -> PathBuf {
        self.archives_dir().join(tenant_public_id)
    }

    /// Raw uploaded import archives
    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join("uploads")
    }

    /// Upload directory for a single tenant
    pub fn tenant_uploads_dir(&self, tenant_public_id: &str) -> PathBuf {
        self.uploads_dir().join(tenant_public_id)
    }

    /// Scratch space for export staging and import extraction
    pub fn tmp_dir(&self) -> PathBuf {
        self.base_dir.join("tmp")
    }

    /// Root of all storage disks
    pub fn disks_dir(&self) -> PathBuf {
        self.base_dir.join("disks")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the audit log
    pub fn audit_log(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), VaultError> {
        for dir in [
            self.base_dir.clone(),
            self.archives_dir(),
            self.uploads_dir(),
            self.tmp_dir(),
            self.disks_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                VaultError::Io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        Ok(())
    }

    /// Check if tenant-vault has been initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

/// Resolve the default data directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, VaultError> {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(config_home).join("tenant-vault"));
    }
    let home = std::env::var("HOME")
        .map_err(|_| VaultError::Config("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home).join(".config").join("tenant-vault"))
}

/// Resolve the default data directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, VaultError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| VaultError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("tenant-vault"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = VaultPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.database_file(), temp_dir.path().join("vault.db"));
        assert_eq!(
            paths.tenant_archives_dir("t-1"),
            temp_dir.path().join("archives").join("t-1")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = VaultPaths::with_base_dir(temp_dir.path().join("nested"));

        paths.ensure_directories().unwrap();

        assert!(paths.archives_dir().exists());
        assert!(paths.uploads_dir().exists());
        assert!(paths.tmp_dir().exists());
        assert!(paths.disks_dir().exists());
    }
}
