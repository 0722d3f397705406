//! Configuration module for tenant-vault
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Settings persistence (archive options, storage disks)

pub mod paths;
pub mod settings;

pub use paths::VaultPaths;
pub use settings::Settings;
