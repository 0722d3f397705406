//! Tenant and user CLI commands

use clap::Subcommand;

use crate::display::format_tenant_list;
use crate::error::VaultResult;
use crate::storage::Storage;

/// Tenant subcommands
#[derive(Subcommand)]
pub enum TenantCommands {
    /// Create a new tenant
    Add {
        /// Tenant name
        name: String,
    },
    /// List all tenants
    List,
}

/// User subcommands
#[derive(Subcommand)]
pub enum UserCommands {
    /// Add a user to a tenant
    Add {
        /// Tenant name or public ID
        tenant: String,
        /// Email address
        email: String,
        /// Display name (defaults to the email address)
        #[arg(short, long)]
        name: Option<String>,
    },
}

/// Handle a tenant command
pub fn handle_tenant_command(storage: &Storage, cmd: TenantCommands) -> VaultResult<()> {
    match cmd {
        TenantCommands::Add { name } => {
            let tenant = storage.tenants().create(&name)?;
            println!("Created tenant: {}", tenant.name);
            println!("  ID: {}", tenant.public_id.to_uuid_string());
        }
        TenantCommands::List => {
            let tenants = storage.tenants().list()?;
            print!("{}", format_tenant_list(&tenants));
            if tenants.is_empty() {
                println!();
                println!("Create one with: tvault tenant add <name>");
            }
        }
    }
    Ok(())
}

/// Handle a user command
pub fn handle_user_command(storage: &Storage, cmd: UserCommands) -> VaultResult<()> {
    match cmd {
        UserCommands::Add {
            tenant,
            email,
            name,
        } => {
            let tenant = storage.tenants().find(&tenant)?;
            let name = name.unwrap_or_else(|| email.clone());
            let user = storage.users().create(&tenant, &email, &name)?;
            println!("Added user {} to {}", user.email, tenant.name);
            println!("  ID: {}", user.public_id.to_uuid_string());
        }
    }
    Ok(())
}
