//! Coordinator REST service.
//!
//! The sole authority over TransferRequest, Bundle, Metadata and heartbeat
//! state. Workers are stateless; every mutation passes through these
//! routes. A background reaper releases claims that outlive
//! `max_claim_age` so work abandoned by a dead worker becomes claimable
//! again.

pub mod auth;
mod handlers;
mod routes;

pub use routes::create_router;

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoordinatorConfig;
use crate::repository::{
    BundleRepository, MetadataRepository, RequestRepository, StatusRepository,
};

use auth::AuthState;

/// Heartbeats older than this many seconds mark a component type WARN on
/// the status dashboard.
const HEARTBEAT_STALE_SECONDS: i64 = 600;

/// Shared state for the coordinator.
#[derive(Clone)]
pub struct AppState {
    pub requests: Arc<RequestRepository>,
    pub bundles: Arc<BundleRepository>,
    pub metadata: Arc<MetadataRepository>,
    pub status: Arc<StatusRepository>,
    pub auth: Arc<AuthState>,
    pub heartbeat_stale_seconds: i64,
}

impl AppState {
    pub async fn new(config: &CoordinatorConfig) -> anyhow::Result<Self> {
        let auth = match (&config.auth_secret, &config.openid_url) {
            (Some(secret), _) => AuthState::shared_secret(&config.audience, secret),
            (None, Some(openid_url)) => {
                AuthState::from_openid(&config.audience, openid_url).await?
            }
            (None, None) => anyhow::bail!("no authentication configured"),
        };
        Ok(Self {
            requests: Arc::new(RequestRepository::new(&config.database_path)?),
            bundles: Arc::new(BundleRepository::new(&config.database_path)?),
            metadata: Arc::new(MetadataRepository::new(&config.database_path)?),
            status: Arc::new(StatusRepository::new(&config.database_path)?),
            auth: Arc::new(auth),
            heartbeat_stale_seconds: HEARTBEAT_STALE_SECONDS,
        })
    }
}

/// Periodically release claims older than `max_claim_age`.
///
/// Racing with a live worker is safe: the worker's eventual PATCH is
/// fenced by its claimant identity and will be rejected if someone else
/// has re-claimed the bundle in the meantime.
pub fn spawn_reaper(state: AppState, max_claim_age: Duration, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match state.bundles.release_stale_claims(max_claim_age) {
                Ok(reaped) => {
                    for uuid in reaped {
                        tracing::warn!("reaped stale claim on Bundle {uuid}");
                    }
                }
                Err(e) => tracing::error!("bundle reaper pass failed: {e}"),
            }
            match state.requests.release_stale_claims(max_claim_age) {
                Ok(reaped) => {
                    for uuid in reaped {
                        tracing::warn!("reaped stale claim on TransferRequest {uuid}");
                    }
                }
                Err(e) => tracing::error!("request reaper pass failed: {e}"),
            }
        }
    });
}

/// Start the coordinator service and run until shutdown.
pub async fn serve(config: &CoordinatorConfig) -> anyhow::Result<()> {
    let state = AppState::new(config).await?;
    spawn_reaper(state.clone(), config.max_claim_age, config.reaper_interval);
    if let Some(port) = config.metrics_port {
        crate::metrics::spawn_exporter(port);
    }

    let app = create_router(state);
    tracing::info!(
        "Starting coordinator at http://{}:{}",
        config.host,
        config.port
    );

    let listener =
        tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
