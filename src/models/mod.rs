//! Core data models for tenant-vault
//!
//! Tenants and users are the explicit context every engine call receives;
//! backup jobs are the status records the engines report into.

pub mod ids;
pub mod job;
pub mod tenant;

pub use ids::{new_public_id, JobId, TenantId, UserId};
pub use job::{BackupJob, ImportMode, JobKind, JobStatus};
pub use tenant::{Tenant, User};
