//! Command implementations for the coldstow CLI.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::client::CoordinatorClient;
use crate::config::{require_env, AuthCredentials, CoordinatorConfig, WorkerConfig};
use crate::models::{BundlePatch, BundleStatus, NewTransferRequest, RequestPatch, RequestStatus};
use crate::worker::Worker;

/// Build a client for admin commands from the environment.
fn admin_client() -> anyhow::Result<CoordinatorClient> {
    let url = require_env("LTA_REST_URL")?;
    let auth = AuthCredentials::from_env()?;
    Ok(CoordinatorClient::new(
        &url,
        &auth,
        Duration::from_secs(30),
        3,
    )?)
}

/// Start the coordinator REST service.
pub async fn cmd_serve() -> anyhow::Result<()> {
    let config = CoordinatorConfig::from_env()?;
    println!(
        "{} Starting coordinator at http://{}:{}",
        style("→").cyan(),
        config.host,
        config.port
    );
    println!("  Press Ctrl+C to stop");
    crate::server::serve(&config).await
}

/// Start one worker harness instance for a stage.
pub async fn cmd_worker(stage: &str) -> anyhow::Result<()> {
    if !crate::stages::STAGE_NAMES.contains(&stage) {
        anyhow::bail!(
            "unknown stage '{stage}'; expected one of: {}",
            crate::stages::STAGE_NAMES.join(", ")
        );
    }
    let config = WorkerConfig::from_env()?;
    let client = Arc::new(CoordinatorClient::new(
        &config.coordinator_url,
        &config.auth,
        config.work_timeout,
        config.work_retries,
    )?);
    let action = crate::stages::build(stage, &config, client)?;
    let worker = Worker::new(config, action)?;
    worker.run().await
}

pub async fn cmd_request_new(source: &str, dest: &str, path: &str) -> anyhow::Result<()> {
    let client = admin_client()?;
    let uuid = client
        .create_request(&NewTransferRequest {
            source: source.to_string(),
            dest: dest.to_string(),
            path: path.to_string(),
        })
        .await?;
    println!("{} Created TransferRequest {}", style("✓").green(), uuid);
    Ok(())
}

pub async fn cmd_request_ls() -> anyhow::Result<()> {
    let client = admin_client()?;
    let requests = client.list_requests().await?;
    if requests.is_empty() {
        println!("{} No transfer requests", style("!").yellow());
        return Ok(());
    }
    for request in requests {
        println!(
            "{}  {}  {} -> {}  {}",
            request.uuid,
            style(request.status.as_str()).cyan(),
            request.source,
            request.dest,
            request.path
        );
    }
    Ok(())
}

pub async fn cmd_request_status(uuid: &str) -> anyhow::Result<()> {
    let client = admin_client()?;
    let request = client.get_request(uuid).await?;
    println!("{}", serde_json::to_string_pretty(&request)?);
    let bundles = client.bundles_for_request(uuid).await?;
    println!("{} {} bundle(s)", style("→").cyan(), bundles.len());
    for bundle_uuid in bundles {
        let bundle = client.get_bundle(&bundle_uuid).await?;
        println!(
            "  {}  {}  {}",
            bundle.uuid,
            style(bundle.status.as_str()).cyan(),
            bundle.reason
        );
    }
    Ok(())
}

pub async fn cmd_request_update_status(uuid: &str, status: &str) -> anyhow::Result<()> {
    let status = RequestStatus::from_str(status)
        .ok_or_else(|| anyhow::anyhow!("unknown request status '{status}'"))?;
    let client = admin_client()?;
    client
        .patch_request(
            uuid,
            &RequestPatch {
                status: Some(status),
                ..Default::default()
            },
        )
        .await?;
    println!(
        "{} TransferRequest {} is now {}",
        style("✓").green(),
        uuid,
        status.as_str()
    );
    Ok(())
}

pub async fn cmd_bundle_ls(request: Option<&str>, status: Option<&str>) -> anyhow::Result<()> {
    let client = admin_client()?;
    match request {
        Some(request) => {
            for uuid in client.bundles_for_request(request).await? {
                let bundle = client.get_bundle(&uuid).await?;
                if let Some(wanted) = status {
                    if bundle.status.as_str() != wanted {
                        continue;
                    }
                }
                println!("{}  {}", uuid, style(bundle.status.as_str()).cyan());
            }
        }
        None => {
            let overview = client.status_overview().await?;
            if let Some(counts) = overview["bundles"].as_object() {
                for (status, count) in counts {
                    println!("{:>8}  {}", count, style(status).cyan());
                }
            }
        }
    }
    Ok(())
}

pub async fn cmd_bundle_status(uuid: &str) -> anyhow::Result<()> {
    let client = admin_client()?;
    let bundle = client.get_bundle(uuid).await?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}

pub async fn cmd_bundle_update_status(uuid: &str, status: &str) -> anyhow::Result<()> {
    let status = BundleStatus::from_str(status)
        .ok_or_else(|| anyhow::anyhow!("unknown bundle status '{status}'"))?;
    let client = admin_client()?;
    client
        .patch_bundle(
            uuid,
            &BundlePatch {
                status: Some(status),
                ..Default::default()
            },
        )
        .await?;
    println!(
        "{} Bundle {} is now {}",
        style("✓").green(),
        uuid,
        status.as_str()
    );
    Ok(())
}

pub async fn cmd_status(component_type: Option<&str>) -> anyhow::Result<()> {
    let client = admin_client()?;
    let body = match component_type {
        Some(component_type) => client.status_for_type(component_type).await?,
        None => client.status_overview().await?,
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Cull old heartbeat records straight out of the store (local admin
/// tooling; runs on the coordinator host).
pub fn cmd_status_cull(days: i64) -> anyhow::Result<()> {
    let db_path = require_env("LTA_DATABASE_PATH")?;
    let repo = crate::repository::StatusRepository::new(std::path::Path::new(&db_path))?;
    let removed = repo.cull(days)?;
    println!(
        "{} Removed {} heartbeat record(s) older than {} day(s)",
        style("✓").green(),
        removed,
        days
    );
    Ok(())
}
