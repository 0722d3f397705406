//! Settings for tenant-vault
//!
//! Manages archive options, upload limits and the storage disks that file
//! blobs are exported from and restored to.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::VaultPaths;
use crate::error::VaultError;

/// Settings for tenant-vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Whether exports include file blobs unless told otherwise
    #[serde(default = "default_include_files")]
    pub include_files_default: bool,

    /// Deflate level used when packaging archives (0 stores uncompressed)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Largest accepted import upload in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Storage disks by name, relative to the disks directory
    #[serde(default = "default_disks")]
    pub disks: BTreeMap<String, PathBuf>,

    /// Disk used when a blob names a disk that is not configured
    #[serde(default = "default_disk")]
    pub default_disk: String,
}

fn default_schema_version() -> u32 {
    1
}

fn default_include_files() -> bool {
    true
}

fn default_compression_level() -> u32 {
    6
}

fn default_max_upload_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_disks() -> BTreeMap<String, PathBuf> {
    let mut disks = BTreeMap::new();
    disks.insert("local".to_string(), PathBuf::from("local"));
    disks.insert("private".to_string(), PathBuf::from("private"));
    disks
}

fn default_disk() -> String {
    "local".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            include_files_default: default_include_files(),
            compression_level: default_compression_level(),
            max_upload_bytes: default_max_upload_bytes(),
            disks: default_disks(),
            default_disk: default_disk(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &VaultPaths) -> Result<Self, VaultError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| VaultError::Io(format!("Failed to read settings file: {}", e)))?;

            let settings: Settings = serde_json::from_str(&contents)
                .map_err(|e| VaultError::Config(format!("Failed to parse settings file: {}", e)))?;

            settings.validate()?;
            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &VaultPaths) -> Result<(), VaultError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(paths.settings_file(), contents)
            .map_err(|e| VaultError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// Reject settings the engines cannot work with
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.compression_level > 9 {
            return Err(VaultError::Config(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if !self.disks.contains_key(&self.default_disk) {
            return Err(VaultError::Config(format!(
                "default_disk '{}' is not a configured disk",
                self.default_disk
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.include_files_default);
        assert_eq!(settings.compression_level, 6);
        assert!(settings.disks.contains_key("local"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = VaultPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.include_files_default = false;
        settings.compression_level = 0;
        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert!(!loaded.include_files_default);
        assert_eq!(loaded.compression_level, 0);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"compression_level": 3}"#).unwrap();
        assert_eq!(settings.compression_level, 3);
        assert_eq!(settings.default_disk, "local");
    }

    #[test]
    fn test_unknown_default_disk_rejected() {
        let settings = Settings {
            default_disk: "s3".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
