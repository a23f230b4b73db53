//! Locator: expand a retrieval TransferRequest into located bundles.
//!
//! The retrieval mirror of the picker: instead of enumerating warehouse
//! files, it finds the archived bundles at the source (tape) site that
//! cover the requested path and records each as a bundle in `located`,
//! carrying over the archived checksum, size and tape path.

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::FileCatalogClient;
use crate::client::CoordinatorClient;
use crate::config::{require_env, WorkerConfig};
use crate::models::{BundleStatus, Checksum, NewBundle, RequestPatch};
use crate::worker::{ActionError, ClaimKind, Outcome, PatchSet, StageAction, WorkItem};

pub struct Locator {
    client: Arc<CoordinatorClient>,
    catalog: FileCatalogClient,
}

impl Locator {
    pub fn from_env(
        config: &WorkerConfig,
        client: Arc<CoordinatorClient>,
    ) -> anyhow::Result<Self> {
        let catalog = FileCatalogClient::new(
            &require_env("FILE_CATALOG_REST_URL")?,
            &config.auth,
            config.work_timeout,
            config.work_retries,
        )?;
        Ok(Self { client, catalog })
    }
}

#[async_trait]
impl StageAction for Locator {
    fn stage(&self) -> &'static str {
        "locator"
    }

    fn claim_kind(&self) -> ClaimKind {
        ClaimKind::Requests
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let request = item.into_request()?;
        tracing::info!(
            "locating archived bundles for {} at {} under {}",
            request.uuid,
            request.source,
            request.path
        );

        let archives = self
            .catalog
            .archived_bundles_under_path(&request.source, &request.path)
            .await
            .map_err(|e| ActionError::Failed(format!("file catalog query failed: {e}")))?;
        if archives.is_empty() {
            return Err(ActionError::Failed(format!(
                "no archived bundles at {} cover {}",
                request.source, request.path
            )));
        }

        let bundles: Vec<NewBundle> = archives
            .iter()
            .map(|archive| NewBundle {
                request: request.uuid.clone(),
                source: request.source.clone(),
                dest: request.dest.clone(),
                path: request.path.clone(),
                status: BundleStatus::Located,
                file_count: 0,
                // the archived record's logical name is the tape path
                bundle_path: Some(archive.logical_name.clone()),
                size: Some(archive.file_size),
                checksum: archive.checksum.as_ref().map(|c| Checksum {
                    sha512: c.sha512.clone(),
                    adler32: c.adler32.clone().unwrap_or_default(),
                }),
            })
            .collect();

        let uuids = self
            .client
            .bulk_create_bundles(&bundles)
            .await
            .map_err(|e| ActionError::Failed(format!("could not create bundles: {e}")))?;
        tracing::info!(
            "located {} archived bundles for TransferRequest {}",
            uuids.len(),
            request.uuid
        );

        Ok(Outcome::Advance(PatchSet::Request(RequestPatch::default())))
    }
}
