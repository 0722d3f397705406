//! Job display formatting
//!
//! Formats backup jobs and validation reports for terminal output.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backup::ValidationReport;
use crate::models::BackupJob;

/// Format a list of jobs as a table, newest first as given
pub fn format_job_list(jobs: &[BackupJob]) -> String {
    if jobs.is_empty() {
        return "No jobs found.".to_string();
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<8}  {:<6}  {:<10}  {:>4}  {:>9}  {:<6}  {}\n",
        "ID", "Kind", "Status", "%", "Size", "Age", "Step"
    ));
    output.push_str(&format!(
        "{:-<8}  {:-<6}  {:-<10}  {:->4}  {:->9}  {:-<6}  {:-<12}\n",
        "", "", "", "", "", "", ""
    ));

    for job in jobs {
        let mut kind = job.kind.to_string();
        if job.is_pre_restore() {
            kind.push('*');
        }
        output.push_str(&format!(
            "{:<8}  {:<6}  {:<10}  {:>4}  {:>9}  {:<6}  {}\n",
            short_id(job),
            kind,
            job.status.as_str(),
            job.progress,
            job.file_size.map(format_size).unwrap_or_else(|| "-".into()),
            format_age(job.created_at),
            job.current_step.as_deref().unwrap_or(""),
        ));
    }

    if jobs.iter().any(BackupJob::is_pre_restore) {
        output.push_str("\n* pre-restore snapshot\n");
    }
    output
}

/// Format one job with its configuration and statistics
pub fn format_job_details(job: &BackupJob) -> String {
    let mut output = String::new();
    output.push_str(&format!("Job:      {}\n", job.id.to_uuid_string()));
    output.push_str(&format!("Kind:     {}\n", job.kind));
    output.push_str(&format!("Status:   {} ({}%)\n", job.status, job.progress));
    if let Some(step) = &job.current_step {
        output.push_str(&format!("Step:     {}\n", step));
    }
    output.push_str(&format!(
        "Created:  {}\n",
        job.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
        output.push_str(&format!(
            "Duration: {}\n",
            format_duration(completed.signed_duration_since(started))
        ));
    }
    if let Some(path) = &job.file_path {
        output.push_str(&format!("Archive:  {}\n", path.display()));
    }
    if let Some(size) = job.file_size {
        output.push_str(&format!("Size:     {}\n", format_size(size)));
    }
    if let Some(checksum) = &job.checksum {
        output.push_str(&format!("Checksum: {}\n", checksum));
    }
    if let Some(message) = &job.error_message {
        output.push_str(&format!("Error:    {}\n", message));
    }

    if !job.config.is_empty() {
        output.push_str("\nOptions:\n");
        for (key, value) in &job.config {
            output.push_str(&format!("  {:<20} {}\n", key, plain(value)));
        }
    }
    if !job.stats.is_empty() {
        output.push_str("\nStatistics:\n");
        for (key, value) in &job.stats {
            output.push_str(&format!("  {:<20} {}\n", key, plain(value)));
        }
    }
    output
}

/// Format a validation report with its errors and warnings
pub fn format_validation_report(report: &ValidationReport) -> String {
    let mut output = String::new();
    let info = &report.info;
    output.push_str(&format!(
        "Status:   {}\n",
        if report.valid { "Valid" } else { "Invalid" }
    ));
    if !info.backup_version.is_empty() {
        output.push_str(&format!("Version:  {} (app {})\n", info.backup_version, info.app_version));
        output.push_str(&format!("Created:  {}\n", info.created_at));
        output.push_str(&format!(
            "Source:   {}{}\n",
            info.tenant_name,
            if info.is_cross_tenant { " (another tenant)" } else { "" }
        ));
        output.push_str(&format!(
            "Contents: {} record(s), {} file(s)\n",
            info.total_entities, info.total_files
        ));
    }
    for error in &report.errors {
        output.push_str(&format!("  error:   {}\n", error));
    }
    for warning in &report.warnings {
        output.push_str(&format!("  warning: {}\n", warning));
    }
    output
}

fn short_id(job: &BackupJob) -> String {
    job.id.to_uuid_string().chars().take(8).collect()
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_age(at: DateTime<Utc>) -> String {
    format_duration(Utc::now().signed_duration_since(at))
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    format!("{}d", hours / 24)
}

/// Format a file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
