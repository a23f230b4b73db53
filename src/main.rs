//! Coldstow - archival job coordinator.
//!
//! A claim-based pipeline for moving large datasets from a warehouse site
//! into tape archives at remote sites, and retrieving and unpacking them
//! on demand.

mod archive;
mod catalog;
mod checksum;
mod cli;
mod client;
mod config;
mod metrics;
mod models;
mod pathutil;
mod repository;
mod server;
mod stages;
mod worker;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging; LOG_LEVEL selects the default filter
    let default_filter = match std::env::var("LOG_LEVEL").as_deref() {
        Ok("DEBUG") | Ok("debug") => "coldstow=debug",
        Ok("WARN") | Ok("warn") => "coldstow=warn",
        Ok("ERROR") | Ok("error") => "coldstow=error",
        _ => "coldstow=info",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
