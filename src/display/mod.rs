//! Display formatting for terminal output
//!
//! Provides utilities for formatting jobs, tenants and validation reports
//! for terminal display.

pub mod job;
pub mod tenant;

pub use job::{format_duration, format_job_details, format_job_list, format_size, format_validation_report};
pub use tenant::format_tenant_list;
