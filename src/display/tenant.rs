//! Tenant display formatting

use crate::models::Tenant;

/// Format tenants as a table
pub fn format_tenant_list(tenants: &[Tenant]) -> String {
    if tenants.is_empty() {
        return "No tenants found.".to_string();
    }

    let name_width = tenants
        .iter()
        .map(|t| t.name.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut output = String::new();
    output.push_str(&format!(
        "{:<name_width$}  {:<36}  {}\n",
        "Name",
        "Public ID",
        "Created",
        name_width = name_width,
    ));
    output.push_str(&format!(
        "{:-<name_width$}  {:-<36}  {:-<10}\n",
        "",
        "",
        "",
        name_width = name_width,
    ));
    for tenant in tenants {
        output.push_str(&format!(
            "{:<name_width$}  {:<36}  {}\n",
            tenant.name,
            tenant.public_id.to_uuid_string(),
            tenant.created_at.format("%Y-%m-%d"),
            name_width = name_width,
        ));
    }
    output
}
