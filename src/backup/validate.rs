//! Archive validation
//!
//! Checks an uploaded archive without extracting it. Structural problems
//! and unsafe paths are errors; a different source tenant, a different
//! schema fingerprint and missing file blobs are warnings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::archive::{is_unsafe_member, ArchiveReader};
use super::manifest::{sha256_label, Manifest, Metadata, MANIFEST_FILE, METADATA_FILE};
use crate::error::{VaultError, VaultResult};
use crate::models::Tenant;

/// Summary of an archive for display before import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub backup_version: String,
    pub app_version: String,
    pub created_at: String,
    pub tenant_name: String,
    pub is_cross_tenant: bool,
    pub total_entities: u64,
    pub total_files: u64,
}

/// Outcome of validating an archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: ArchiveInfo,
}

impl ValidationReport {
    /// Turn an invalid report into a [`VaultError::Validation`]
    pub fn into_result(self) -> VaultResult<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(VaultError::Validation(self.errors))
        }
    }
}

/// Validate the archive at `path` for import into `tenant`
///
/// `schema_fingerprint` is the target database's current fingerprint.
pub fn validate_archive(path: &Path, tenant: &Tenant, schema_fingerprint: &str) -> ValidationReport {
    let mut report = ValidationReport::default();
    check(path, tenant, schema_fingerprint, &mut report);
    report.valid = report.errors.is_empty();
    report
}

fn check(path: &Path, tenant: &Tenant, schema_fingerprint: &str, report: &mut ValidationReport) {
    let mut reader = match ArchiveReader::open(path) {
        Ok(reader) => reader,
        Err(e) => {
            report.errors.push(e.to_string());
            return;
        }
    };

    for name in reader.member_names() {
        if is_unsafe_member(&name) {
            report.errors.push(format!("Unsafe path in archive: {}", name));
        }
    }

    let metadata: Option<Metadata> = read_document(&mut reader, METADATA_FILE, report);
    let manifest: Option<Manifest> = read_document(&mut reader, MANIFEST_FILE, report);

    if let Some(metadata) = &metadata {
        if !metadata.is_supported_version() {
            report.errors.push(format!(
                "Unsupported backup version {}",
                metadata.backup_version
            ));
        }
        let cross_tenant = metadata.tenant_public_id != tenant.public_id.to_uuid_string();
        if cross_tenant {
            report.warnings.push(format!(
                "Archive was created for tenant '{}'; records will be imported with new identifiers",
                metadata.tenant_name
            ));
        }
        if metadata.schema_version != schema_fingerprint {
            report.warnings.push(
                "Archive was created with a different schema version; unknown fields will be dropped"
                    .to_string(),
            );
        }

        report.info.backup_version = metadata.backup_version.clone();
        report.info.app_version = metadata.app_version.clone();
        report.info.created_at = metadata.created_at.to_rfc3339();
        report.info.tenant_name = metadata.tenant_name.clone();
        report.info.is_cross_tenant = cross_tenant;
    }

    if let Some(manifest) = &manifest {
        check_manifest(&mut reader, manifest, report);
        report.info.total_entities = manifest.total_entities;
        report.info.total_files = manifest.total_files;
    }
}

fn check_manifest(reader: &mut ArchiveReader, manifest: &Manifest, report: &mut ValidationReport) {
    let mut counted = 0u64;
    for entry in &manifest.entities {
        counted += entry.count;
        if entry.known_type().is_none() {
            report.warnings.push(format!(
                "Unknown entity type '{}' will be skipped",
                entry.entity_type
            ));
        }
        if is_unsafe_member(&entry.file) {
            report
                .errors
                .push(format!("Unsafe path in manifest: {}", entry.file));
            continue;
        }
        match reader.member_sha256(&entry.file) {
            Ok(Some(digest)) if sha256_label(&digest) == entry.checksum => {}
            Ok(Some(_)) => report
                .errors
                .push(format!("Checksum mismatch for {}", entry.file)),
            Ok(None) => report
                .errors
                .push(format!("Missing entity stream {}", entry.file)),
            Err(e) => report
                .errors
                .push(format!("Failed to read {}: {}", entry.file, e)),
        }
    }
    if counted != manifest.total_entities {
        report.warnings.push(format!(
            "Manifest total_entities is {} but entity counts add up to {}",
            manifest.total_entities, counted
        ));
    }

    for file in &manifest.files {
        if is_unsafe_member(&file.path) || is_unsafe_member(&file.original_path) {
            report
                .errors
                .push(format!("Unsafe file path in manifest: {}", file.path));
        } else if !reader.contains(&file.path) {
            report
                .warnings
                .push(format!("File {} is listed but not in the archive", file.path));
        }
    }
}

fn read_document<T: serde::de::DeserializeOwned>(
    reader: &mut ArchiveReader,
    name: &str,
    report: &mut ValidationReport,
) -> Option<T> {
    match reader.read_string(name) {
        Ok(Some(contents)) => match serde_json::from_str(&contents) {
            Ok(document) => Some(document),
            Err(e) => {
                report.errors.push(format!("Invalid {}: {}", name, e));
                None
            }
        },
        Ok(None) => {
            report.errors.push(format!("Missing {}", name));
            None
        }
        Err(e) => {
            report.errors.push(format!("Failed to read {}: {}", name, e));
            None
        }
    }
}
