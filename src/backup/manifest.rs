//! Archive metadata and manifest documents
//!
//! `metadata.json` describes where and when an archive was produced;
//! `manifest.json` lists every record stream and file blob it contains,
//! each with a `sha256:<hex>` checksum.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::EntityType;

/// Archive format version written by this crate
pub const BACKUP_VERSION: &str = "1.0";

/// Archive format major versions this crate can import
pub const SUPPORTED_MAJOR_VERSIONS: &[u32] = &[1];

pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHECKSUM_ALGO: &str = "sha256";

/// Who produced the archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedBy {
    pub public_id: Option<String>,
    pub email: Option<String>,
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub backup_version: String,
    pub app_version: String,
    pub created_at: DateTime<Utc>,
    pub tenant_public_id: String,
    pub tenant_name: String,
    /// Fingerprint of the managed tables at export time
    pub schema_version: String,
    #[serde(default = "default_checksum_algo")]
    pub checksum_algo: String,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    pub created_by: Option<CreatedBy>,
}

fn default_checksum_algo() -> String {
    CHECKSUM_ALGO.to_string()
}

impl Metadata {
    /// Major component of `backup_version`, if it parses
    pub fn major_version(&self) -> Option<u32> {
        self.backup_version.split('.').next()?.trim().parse().ok()
    }

    pub fn is_supported_version(&self) -> bool {
        self.major_version()
            .is_some_and(|major| SUPPORTED_MAJOR_VERSIONS.contains(&major))
    }
}

/// One record stream in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub file: String,
    pub count: u64,
    pub checksum: String,
}

impl EntityEntry {
    /// Parsed entity type; `None` for types this build does not know
    pub fn known_type(&self) -> Option<EntityType> {
        EntityType::parse(&self.entity_type)
    }
}

/// One file blob in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Member name inside the archive, `files/<disk>/<original_path>`
    pub path: String,
    pub original_path: String,
    pub disk: String,
    pub size: u64,
    pub checksum: String,
    pub entity_type: String,
    pub entity_public_id: String,
}

/// Contents of `manifest.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub entities: Vec<EntityEntry>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    pub total_entities: u64,
    pub total_files: u64,
}

impl Manifest {
    pub fn add_entity(&mut self, entry: EntityEntry) {
        self.total_entities += entry.count;
        self.entities.push(entry);
    }

    pub fn add_file(&mut self, entry: FileEntry) {
        self.total_files += 1;
        self.files.push(entry);
    }

    pub fn entity(&self, entity_type: EntityType) -> Option<&EntityEntry> {
        self.entities
            .iter()
            .find(|e| e.entity_type == entity_type.as_str())
    }
}

/// Archive member name for a file blob
pub fn file_member(disk: &str, original_path: &str) -> String {
    format!("files/{}/{}", disk, original_path.trim_start_matches('/'))
}

/// Format a hex digest the way checksums are written everywhere
pub fn sha256_label(hex_digest: &str) -> String {
    format!("{}:{}", CHECKSUM_ALGO, hex_digest)
}
