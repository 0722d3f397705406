use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use tenant_vault::cli::{
    handle_audit_command, handle_export_command, handle_import_command, handle_job_command,
    handle_tenant_command, handle_upload_command, handle_user_command, handle_validate_command,
    JobCommands, TenantCommands, UserCommands,
};
use tenant_vault::config::{Settings, VaultPaths};
use tenant_vault::storage::Storage;

#[derive(Parser)]
#[command(
    name = "tvault",
    version,
    about = "Tenant backup and restore for a multi-tenant ledger",
    long_about = "tvault exports a tenant's ledger records and documents into a \
                  portable ZIP archive and restores such archives into the same \
                  or a different tenant, all-or-nothing."
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Show current configuration and paths
    Config,

    /// Tenant management commands
    #[command(subcommand)]
    Tenant(TenantCommands),

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Export a tenant into an archive
    Export {
        /// Tenant name or public ID
        tenant: String,
        /// Email of the user requesting the export
        #[arg(short, long)]
        user: Option<String>,
        /// Leave document files out of the archive
        #[arg(long)]
        no_files: bool,
    },

    /// Upload an archive as a pending import
    Upload {
        /// Target tenant name or public ID
        tenant: String,
        /// Archive file
        file: PathBuf,
        /// Email of the user performing the import
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Validate an uploaded archive
    Validate {
        /// Import job ID or ID prefix
        job: String,
    },

    /// Run an uploaded import
    Import {
        /// Import job ID or ID prefix
        job: String,
        /// replace or merge
        #[arg(short, long, default_value = "replace")]
        mode: String,
        /// Skip the confirmation for replace imports
        #[arg(short, long)]
        force: bool,
    },

    /// Job management commands
    #[command(subcommand, alias = "job")]
    Jobs(JobCommands),

    /// Show the audit log
    Audit {
        /// Only entries of this job
        #[arg(short, long)]
        job: Option<String>,
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tenant_vault::logging::init(cli.verbose);

    // Initialize paths and settings
    let paths = VaultPaths::new()?;
    let settings = Settings::load_or_create(&paths)?;

    let open = || Storage::open(paths.clone(), settings.clone());

    let Some(command) = cli.command else {
        println!("tvault - tenant backup and restore");
        println!();
        println!("Run 'tvault --help' for usage information.");
        return Ok(());
    };

    match command {
        Commands::Init => {
            println!("Initializing tvault at: {}", paths.base_dir().display());
            settings.save(&paths)?;
            open()?;
            println!("Initialization complete!");
            println!();
            println!("Create a tenant with: tvault tenant add <name>");
        }
        Commands::Config => {
            println!("tvault Configuration");
            println!("====================");
            println!("Data directory:    {}", paths.base_dir().display());
            println!("Database:          {}", paths.database_file().display());
            println!("Archive directory: {}", paths.archives_dir().display());
            println!("Upload directory:  {}", paths.uploads_dir().display());
            println!("Audit log:         {}", paths.audit_log().display());
            println!();
            println!("Settings:");
            println!("  Include files:     {}", settings.include_files_default);
            println!("  Compression level: {}", settings.compression_level);
            println!("  Max upload bytes:  {}", settings.max_upload_bytes);
            println!("  Default disk:      {}", settings.default_disk);
            for (name, dir) in &settings.disks {
                println!("  Disk {:<12} {}", name, paths.disks_dir().join(dir).display());
            }
        }
        Commands::Tenant(cmd) => handle_tenant_command(&open()?, cmd)?,
        Commands::User(cmd) => handle_user_command(&open()?, cmd)?,
        Commands::Export {
            tenant,
            user,
            no_files,
        } => handle_export_command(&open()?, &tenant, user.as_deref(), no_files)?,
        Commands::Upload { tenant, file, user } => {
            handle_upload_command(&open()?, &tenant, &file, user.as_deref())?
        }
        Commands::Validate { job } => handle_validate_command(&open()?, &job)?,
        Commands::Import { job, mode, force } => {
            handle_import_command(&open()?, &job, &mode, force)?
        }
        Commands::Jobs(cmd) => handle_job_command(&open()?, cmd)?,
        Commands::Audit { job, limit } => handle_audit_command(&open()?, job.as_deref(), limit)?,
    }

    Ok(())
}
