//! Worker harness: the uniform, failure-tolerant executor for stage
//! actions.
//!
//! A worker boots, obtains a bearer token, starts a heartbeat task, then
//! loops: POP a work item, run the stage action, PATCH the result (or
//! quarantine). Per-item failures never kill the worker; coordinator
//! trouble ends the cycle and the next cycle retries.

mod action;

pub use action::{ActionError, ClaimKind, Outcome, PatchSet, StageAction, WorkItem};

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::watch;

use crate::client::{ClientError, CoordinatorClient};
use crate::config::WorkerConfig;
use crate::metrics::{LOAD_GAUGE, WORK_FAILURES, WORK_SUCCESSES};
use crate::models::{now, BundlePatch, BundleStatus, RequestPatch, RequestStatus};

/// Outcome of one claim attempt.
enum CycleStep {
    Worked,
    Nothing,
    Backoff,
}

#[derive(Clone)]
struct WorkTimestamps {
    last_work_begin: String,
    last_work_end: String,
}

/// A single worker instance driving one stage.
pub struct Worker {
    config: WorkerConfig,
    action: Arc<dyn StageAction>,
    client: Arc<CoordinatorClient>,
    heartbeat_client: Arc<CoordinatorClient>,
    instance_uuid: String,
    timestamps: Arc<Mutex<WorkTimestamps>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, action: Arc<dyn StageAction>) -> anyhow::Result<Self> {
        let client = Arc::new(CoordinatorClient::new(
            &config.coordinator_url,
            &config.auth,
            config.work_timeout,
            config.work_retries,
        )?);
        let heartbeat_client = Arc::new(CoordinatorClient::new(
            &config.coordinator_url,
            &config.auth,
            config.heartbeat_timeout,
            config.heartbeat_retries,
        )?);
        let timestamp = now();
        Ok(Self {
            config,
            action,
            client,
            heartbeat_client,
            instance_uuid: crate::models::unique_id(),
            timestamps: Arc::new(Mutex::new(WorkTimestamps {
                last_work_begin: timestamp.clone(),
                last_work_end: timestamp,
            })),
        })
    }

    /// The claimant identity carried on every POP and PATCH.
    fn claimant(&self) -> String {
        format!("{}-{}", self.config.component_name, self.instance_uuid)
    }

    /// Run until drained, told to die, or shut down.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            "{} '{}' starting (claims {} at {} -> {})",
            self.action.stage(),
            self.config.component_name,
            self.config.input_status.as_str(),
            self.config.source_site,
            self.config.dest_site,
        );
        if let Some(port) = self.config.metrics_port {
            crate::metrics::spawn_exporter(port);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.heartbeat_client.clone(),
            self.action.clone(),
            self.config.clone(),
            self.timestamps.clone(),
            stop_rx.clone(),
        ));

        let shutdown_tx = stop_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        });

        let mut stop_rx = stop_rx;
        loop {
            self.timestamps.lock().expect("timestamp lock").last_work_begin = now();
            let claimed = self.work_cycle(&stop_rx).await;
            self.timestamps.lock().expect("timestamp lock").last_work_end = now();
            LOAD_GAUGE
                .with_label_values(&[self.action.stage(), "bundle", "work"])
                .set(claimed as i64);

            if self.config.run_once_and_die {
                tracing::info!("run-once-and-die; exiting");
                break;
            }
            if self.config.run_until_no_work && claimed == 0 {
                tracing::info!("work drained; exiting");
                break;
            }
            if *stop_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.work_sleep) => {}
                _ = stop_rx.changed() => break,
            }
        }

        let _ = stop_tx.send(true);
        let _ = heartbeat.await;
        Ok(())
    }

    /// Claim work until the queue is empty; returns how many items were
    /// claimed this cycle.
    async fn work_cycle(&self, stop_rx: &watch::Receiver<bool>) -> usize {
        let mut claimed = 0usize;
        loop {
            if *stop_rx.borrow() {
                return claimed;
            }
            match self.claim_and_work().await {
                CycleStep::Worked => {
                    claimed += 1;
                    if self.config.run_once_and_die {
                        return claimed;
                    }
                }
                CycleStep::Nothing | CycleStep::Backoff => return claimed,
            }
        }
    }

    async fn claim_and_work(&self) -> CycleStep {
        if !self.action.preflight().await {
            tracing::info!(
                "{}: preflight failed; skipping this cycle without claiming",
                self.action.stage()
            );
            return CycleStep::Nothing;
        }

        let claimant = self.claimant();
        let item = match self.action.claim_kind() {
            ClaimKind::Requests => self
                .client
                .pop_request(
                    Some(&self.config.source_site),
                    Some(&self.config.dest_site),
                    &claimant,
                )
                .await
                .map(|r| r.map(WorkItem::Request)),
            ClaimKind::Bundles => self
                .client
                .pop_bundle(
                    Some(&self.config.source_site),
                    Some(&self.config.dest_site),
                    self.config.input_status.as_str(),
                    &claimant,
                )
                .await
                .map(|b| b.map(WorkItem::Bundle)),
        };

        let item = match item {
            Ok(Some(item)) => item,
            Ok(None) => {
                tracing::info!("{}: no work available", self.action.stage());
                return CycleStep::Nothing;
            }
            Err(e) => {
                tracing::error!("{}: pop failed: {e}", self.action.stage());
                return CycleStep::Backoff;
            }
        };

        tracing::info!("{}: claimed {}", self.action.stage(), item.uuid());
        match self.action.execute(item.clone()).await {
            Ok(outcome) => match self.report(&item, outcome).await {
                Ok(()) => {
                    WORK_SUCCESSES
                        .with_label_values(&[self.action.stage(), "bundle", "work"])
                        .inc();
                    CycleStep::Worked
                }
                Err(ClientError::Conflict(_)) => {
                    tracing::warn!(
                        "{}: claim on {} was lost; dropping the work",
                        self.action.stage(),
                        item.uuid()
                    );
                    CycleStep::Worked
                }
                Err(e) => {
                    tracing::error!("{}: could not report result: {e}", self.action.stage());
                    CycleStep::Backoff
                }
            },
            Err(ActionError::Failed(reason)) => {
                WORK_FAILURES
                    .with_label_values(&[self.action.stage(), "bundle", "exception"])
                    .inc();
                self.quarantine(&item, &reason).await;
                CycleStep::Worked
            }
            Err(ActionError::Client(ClientError::Conflict(message))) => {
                tracing::warn!(
                    "{}: claim on {} was lost mid-action: {message}",
                    self.action.stage(),
                    item.uuid()
                );
                CycleStep::Worked
            }
            Err(ActionError::Client(e)) => {
                tracing::error!("{}: coordinator trouble mid-action: {e}", self.action.stage());
                CycleStep::Backoff
            }
        }
    }

    /// PATCH an action's outcome back to the coordinator.
    async fn report(&self, item: &WorkItem, outcome: Outcome) -> Result<(), ClientError> {
        let claimant = self.claimant();
        match (item, outcome) {
            (WorkItem::Bundle(bundle), Outcome::Advance(PatchSet::Bundle(mut patch))) => {
                patch.claimant = Some(claimant);
                patch.status.get_or_insert(self.config.output_status);
                patch.claimed.get_or_insert(false);
                patch.reason.get_or_insert_with(String::new);
                self.client.patch_bundle(&bundle.uuid, &patch).await
            }
            (WorkItem::Request(request), Outcome::Advance(PatchSet::Request(mut patch))) => {
                patch.claimant = Some(claimant);
                patch.claimed.get_or_insert(false);
                self.client.patch_request(&request.uuid, &patch).await
            }
            (WorkItem::Bundle(bundle), Outcome::Requeue) => {
                self.client
                    .patch_bundle(&bundle.uuid, &BundlePatch::requeue(&claimant))
                    .await
            }
            (WorkItem::Request(request), Outcome::Requeue) => {
                let patch = RequestPatch {
                    claimant: Some(claimant),
                    claimed: Some(false),
                    status: Some(RequestStatus::Unclaimed),
                    work_priority_timestamp: Some(now()),
                    ..Default::default()
                };
                self.client.patch_request(&request.uuid, &patch).await
            }
            (_, Outcome::Advance(_)) => Err(ClientError::Decode(
                "action returned a patch for the wrong entity".to_string(),
            )),
        }
    }

    /// Quarantine a failed work item. Failure to quarantine is logged and
    /// swallowed; the reaper will eventually release the claim.
    async fn quarantine(&self, item: &WorkItem, reason: &str) {
        let claimant = self.claimant();
        let reason = format!("{}: {}", self.action.stage(), reason);
        tracing::error!("sending {} to quarantine: {reason}", item.uuid());
        let result = match item {
            WorkItem::Bundle(bundle) => {
                let patch = BundlePatch {
                    claimant: Some(claimant),
                    status: Some(BundleStatus::Quarantined),
                    original_status: Some(bundle.status),
                    reason: Some(reason),
                    work_priority_timestamp: Some(now()),
                    ..Default::default()
                };
                self.client.patch_bundle(&bundle.uuid, &patch).await
            }
            WorkItem::Request(request) => {
                let patch = RequestPatch {
                    claimant: Some(claimant),
                    status: Some(RequestStatus::Quarantined),
                    original_status: Some(request.status),
                    reason: Some(reason),
                    work_priority_timestamp: Some(now()),
                    ..Default::default()
                };
                self.client.patch_request(&request.uuid, &patch).await
            }
        };
        if let Err(e) = result {
            tracing::error!("unable to quarantine {}: {e}", item.uuid());
        }
    }
}

/// Heartbeat task: PATCH /status/{type} on a fixed cadence until stopped.
/// Liveness is best-effort; exhausted retries are logged and the loop
/// carries on, because the reaper covers lost workers.
async fn heartbeat_loop(
    client: Arc<CoordinatorClient>,
    action: Arc<dyn StageAction>,
    config: WorkerConfig,
    timestamps: Arc<Mutex<WorkTimestamps>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    tracing::info!("starting heartbeat loop");
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let snapshot = timestamps.lock().expect("timestamp lock").clone();
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok());
        let mut payload = json!({
            "timestamp": now(),
            "last_work_begin_timestamp": snapshot.last_work_begin,
            "last_work_end_timestamp": snapshot.last_work_end,
            "host": host,
        });
        if let (Some(base), Some(extra)) = (
            payload.as_object_mut(),
            action.status_payload().as_object(),
        ) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        if let Err(e) = client
            .heartbeat(action.stage(), &config.component_name, payload)
            .await
        {
            tracing::error!("heartbeat failed: {e}");
        }
        tokio::select! {
            _ = tokio::time::sleep(config.heartbeat_sleep) => {}
            _ = stop_rx.changed() => break,
        }
    }
    tracing::info!("heartbeat loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::AuthCredentials;
    use crate::models::NewBundle;
    use crate::repository::{
        BundleRepository, MetadataRepository, RequestRepository, StatusRepository,
    };
    use crate::server::{auth::AuthState, create_router, AppState};

    const SECRET: &str = "test-secret";

    /// Spin up a real coordinator on a loopback port.
    async fn spawn_coordinator() -> (String, AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let state = AppState {
            requests: Arc::new(RequestRepository::new(&db_path).unwrap()),
            bundles: Arc::new(BundleRepository::new(&db_path).unwrap()),
            metadata: Arc::new(MetadataRepository::new(&db_path).unwrap()),
            status: Arc::new(StatusRepository::new(&db_path).unwrap()),
            auth: Arc::new(AuthState::shared_secret("long-term-archive", SECRET)),
            heartbeat_stale_seconds: 600,
        };
        let app = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state, dir)
    }

    fn worker_config(url: &str, input: BundleStatus, output: BundleStatus) -> WorkerConfig {
        WorkerConfig {
            component_name: "test-worker".to_string(),
            source_site: "WIPAC".to_string(),
            dest_site: "NERSC".to_string(),
            input_status: input,
            output_status: output,
            coordinator_url: url.to_string(),
            auth: AuthCredentials::SharedSecret {
                secret: SECRET.to_string(),
            },
            work_sleep: Duration::from_millis(50),
            work_retries: 1,
            work_timeout: Duration::from_secs(5),
            heartbeat_sleep: Duration::from_millis(50),
            heartbeat_retries: 1,
            heartbeat_timeout: Duration::from_secs(5),
            run_once_and_die: false,
            run_until_no_work: true,
            metrics_port: None,
        }
    }

    struct AdvanceAction;

    #[async_trait]
    impl StageAction for AdvanceAction {
        fn stage(&self) -> &'static str {
            "bundler"
        }
        async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
            let _ = item.into_bundle()?;
            Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch::default())))
        }
    }

    struct FailingAction;

    #[async_trait]
    impl StageAction for FailingAction {
        fn stage(&self) -> &'static str {
            "bundler"
        }
        async fn execute(&self, _item: WorkItem) -> Result<Outcome, ActionError> {
            Err(ActionError::Failed(
                "checksum mismatch on source file".to_string(),
            ))
        }
    }

    struct SkippingAction {
        preflights: AtomicUsize,
    }

    #[async_trait]
    impl StageAction for SkippingAction {
        fn stage(&self) -> &'static str {
            "tape-mover"
        }
        async fn preflight(&self) -> bool {
            self.preflights.fetch_add(1, Ordering::SeqCst);
            false
        }
        async fn execute(&self, _item: WorkItem) -> Result<Outcome, ActionError> {
            panic!("must not claim when preflight fails");
        }
    }

    fn seed_bundle(state: &AppState, status: BundleStatus) -> String {
        state
            .bundles
            .bulk_create(&[NewBundle {
                request: "req-1".to_string(),
                source: "WIPAC".to_string(),
                dest: "NERSC".to_string(),
                path: "/data/exp/a".to_string(),
                status,
                file_count: 0,
                bundle_path: None,
                size: None,
                checksum: None,
            }])
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_worker_advances_bundle_and_heartbeats() {
        let (url, state, _dir) = spawn_coordinator().await;
        let uuid = seed_bundle(&state, BundleStatus::Specified);

        let config = worker_config(&url, BundleStatus::Specified, BundleStatus::Created);
        let worker = Worker::new(config, Arc::new(AdvanceAction)).unwrap();
        worker.run().await.unwrap();

        let bundle = state.bundles.get(&uuid).unwrap();
        assert_eq!(bundle.status, BundleStatus::Created);
        assert!(!bundle.claimed);

        // at least one heartbeat landed
        let beats = state.status.for_type("bundler").unwrap();
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].component_name, "test-worker");
    }

    #[tokio::test]
    async fn test_worker_quarantines_failed_bundle() {
        let (url, state, _dir) = spawn_coordinator().await;
        let uuid = seed_bundle(&state, BundleStatus::Specified);

        let config = worker_config(&url, BundleStatus::Specified, BundleStatus::Created);
        let worker = Worker::new(config, Arc::new(FailingAction)).unwrap();
        worker.run().await.unwrap();

        let bundle = state.bundles.get(&uuid).unwrap();
        assert_eq!(bundle.status, BundleStatus::Quarantined);
        assert_eq!(bundle.original_status, Some(BundleStatus::Specified));
        assert_eq!(bundle.reason, "bundler: checksum mismatch on source file");
        assert!(!bundle.claimed);
    }

    #[tokio::test]
    async fn test_preflight_failure_claims_nothing() {
        let (url, state, _dir) = spawn_coordinator().await;
        let uuid = seed_bundle(&state, BundleStatus::Taping);

        let config = worker_config(&url, BundleStatus::Taping, BundleStatus::Verifying);
        let action = Arc::new(SkippingAction {
            preflights: AtomicUsize::new(0),
        });
        let worker = Worker::new(config, action.clone()).unwrap();
        worker.run().await.unwrap();

        assert!(action.preflights.load(Ordering::SeqCst) >= 1);
        let bundle = state.bundles.get(&uuid).unwrap();
        assert_eq!(bundle.status, BundleStatus::Taping);
        assert!(!bundle.claimed);
    }

    #[tokio::test]
    async fn test_run_until_no_work_drains_queue() {
        let (url, state, _dir) = spawn_coordinator().await;
        for _ in 0..3 {
            seed_bundle(&state, BundleStatus::Specified);
        }

        let config = worker_config(&url, BundleStatus::Specified, BundleStatus::Created);
        let worker = Worker::new(config, Arc::new(AdvanceAction)).unwrap();
        worker.run().await.unwrap();

        let counts = state.bundles.status_counts().unwrap();
        assert!(counts.contains(&("created".to_string(), 3)));
    }
}
