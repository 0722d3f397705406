//! Named storage disks for document blobs
//!
//! A document row names a disk and a path relative to it. Disks map to
//! directories under the configured disks root; an unknown disk name falls
//! back to the default disk.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::config::{Settings, VaultPaths};
use crate::error::{VaultError, VaultResult};

/// Resolves `(disk, path)` pairs to files on the local filesystem
#[derive(Debug, Clone)]
pub struct DiskRegistry {
    roots: BTreeMap<String, PathBuf>,
    default_disk: String,
}

impl DiskRegistry {
    pub fn new(paths: &VaultPaths, settings: &Settings) -> Self {
        let roots = settings
            .disks
            .iter()
            .map(|(name, dir)| (name.clone(), paths.disks_dir().join(dir)))
            .collect();
        Self {
            roots,
            default_disk: settings.default_disk.clone(),
        }
    }

    /// Name of the disk a blob is actually stored on
    pub fn effective_disk<'a>(&'a self, disk: &'a str) -> &'a str {
        if self.roots.contains_key(disk) {
            disk
        } else {
            &self.default_disk
        }
    }

    fn root(&self, disk: &str) -> VaultResult<&PathBuf> {
        self.roots
            .get(self.effective_disk(disk))
            .ok_or_else(|| VaultError::Config(format!("No storage disk named '{}'", disk)))
    }

    /// Absolute location of a blob; rejects paths escaping the disk
    pub fn resolve(&self, disk: &str, relative: &str) -> VaultResult<PathBuf> {
        if !is_contained(relative) {
            return Err(VaultError::FileRestore {
                path: relative.to_string(),
                message: "path escapes the storage disk".into(),
            });
        }
        Ok(self.root(disk)?.join(relative))
    }

    pub fn exists(&self, disk: &str, relative: &str) -> bool {
        self.resolve(disk, relative)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Open a blob for reading
    pub fn open(&self, disk: &str, relative: &str) -> VaultResult<File> {
        let path = self.resolve(disk, relative)?;
        File::open(&path)
            .map_err(|e| VaultError::Io(format!("Failed to open {}: {}", path.display(), e)))
    }

    /// Write a blob atomically (temp file in the same directory, then rename)
    ///
    /// Returns the number of bytes written.
    pub fn write_atomic(&self, disk: &str, relative: &str, source: &mut dyn Read) -> VaultResult<u64> {
        let path = self.resolve(disk, relative)?;
        let parent = path
            .parent()
            .ok_or_else(|| VaultError::Io(format!("No parent directory for {}", path.display())))?;
        fs::create_dir_all(parent).map_err(|e| {
            VaultError::Io(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| VaultError::Io(format!("Failed to create temp file: {}", e)))?;
        let written = {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let written = io::copy(source, &mut writer)?;
            writer.flush()?;
            written
        };
        temp.as_file().sync_all()?;

        temp.persist(&path).map_err(|e| {
            VaultError::Io(format!("Failed to move blob into {}: {}", path.display(), e))
        })?;
        Ok(written)
    }
}

/// Whether a relative path stays inside the directory it is joined to
fn is_contained(relative: &str) -> bool {
    let path = Path::new(relative);
    !relative.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
