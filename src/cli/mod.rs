//! CLI parser and command dispatch.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coldstow")]
#[command(about = "Archival job coordinator and pipeline workers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator REST service
    Serve,
    /// Run a worker harness instance for one pipeline stage
    Worker {
        /// Stage name (picker, bundler, rate-limiter, ...)
        stage: String,
    },
    /// Manage transfer requests
    Request {
        #[command(subcommand)]
        command: RequestCommands,
    },
    /// Manage bundles
    Bundle {
        #[command(subcommand)]
        command: BundleCommands,
    },
    /// Show component heartbeats, or the whole pipeline overview
    Status {
        /// Component type to inspect (picker, bundler, ...)
        component_type: Option<String>,
    },
    /// Remove heartbeat records older than the given age
    StatusCull {
        /// Age threshold in days
        #[arg(long, default_value_t = 14)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum RequestCommands {
    /// Submit a new archival or retrieval request
    New {
        #[arg(long)]
        source: String,
        #[arg(long)]
        dest: String,
        #[arg(long)]
        path: String,
    },
    /// List all transfer requests
    Ls,
    /// Show one transfer request
    Status { uuid: String },
    /// Set a request's status (e.g. restore a quarantined request)
    UpdateStatus {
        uuid: String,
        /// New status; a quarantined request may only be restored to
        /// its original status
        status: String,
    },
}

#[derive(Subcommand)]
enum BundleCommands {
    /// List bundle uuids, optionally filtered
    Ls {
        #[arg(long)]
        request: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one bundle
    Status { uuid: String },
    /// Set a bundle's status (e.g. restore a quarantined bundle)
    UpdateStatus { uuid: String, status: String },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => commands::cmd_serve().await,
        Commands::Worker { stage } => commands::cmd_worker(&stage).await,
        Commands::Request { command } => match command {
            RequestCommands::New { source, dest, path } => {
                commands::cmd_request_new(&source, &dest, &path).await
            }
            RequestCommands::Ls => commands::cmd_request_ls().await,
            RequestCommands::Status { uuid } => commands::cmd_request_status(&uuid).await,
            RequestCommands::UpdateStatus { uuid, status } => {
                commands::cmd_request_update_status(&uuid, &status).await
            }
        },
        Commands::Bundle { command } => match command {
            BundleCommands::Ls { request, status } => {
                commands::cmd_bundle_ls(request.as_deref(), status.as_deref()).await
            }
            BundleCommands::Status { uuid } => commands::cmd_bundle_status(&uuid).await,
            BundleCommands::UpdateStatus { uuid, status } => {
                commands::cmd_bundle_update_status(&uuid, &status).await
            }
        },
        Commands::Status { component_type } => {
            commands::cmd_status(component_type.as_deref()).await
        }
        Commands::StatusCull { days } => commands::cmd_status_cull(days),
    }
}
