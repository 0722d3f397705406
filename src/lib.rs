//! tenant-vault - Tenant backup and restore for a multi-tenant ledger
//!
//! This library exports a tenant's ledger records and document blobs into
//! a self-describing ZIP archive and restores such archives, into the same
//! tenant or a different one, inside a single database transaction.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `models`: Tenants, users and backup jobs
//! - `registry`: Entity types and their record transformers
//! - `storage`: SQLite storage, job repository and file disks
//! - `backup`: Export and import engines
//! - `audit`: Audit logging system
//! - `cli`, `display`: Command handlers and terminal formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use tenant_vault::config::{Settings, VaultPaths};
//! use tenant_vault::storage::Storage;
//!
//! let paths = VaultPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let storage = Storage::open(paths, settings)?;
//! ```

pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod models;
pub mod registry;
pub mod storage;

pub use error::{VaultError, VaultResult};
