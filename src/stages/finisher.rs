//! Transfer-request-finisher: retire bundles and close out their
//! request.
//!
//! Claims bundles whose pipeline work is done, drops their Metadata
//! side-tables, and once every sibling bundle has drained, marks the
//! TransferRequest finished.

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::CoordinatorClient;
use crate::models::{BundlePatch, BundleStatus, RequestPatch, RequestStatus};
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

/// Metadata rows deleted per bulk call.
const DELETE_CHUNK_SIZE: u32 = 1000;

pub struct Finisher {
    client: Arc<CoordinatorClient>,
}

impl Finisher {
    pub fn new(client: Arc<CoordinatorClient>) -> Self {
        Self { client }
    }

    /// Drop the bundle's Metadata side-table now that it is terminal.
    async fn drop_metadata(&self, bundle_uuid: &str) -> Result<(), ActionError> {
        loop {
            let page = self
                .client
                .metadata_for_bundle(bundle_uuid, DELETE_CHUNK_SIZE, 0)
                .await?;
            if page.is_empty() {
                return Ok(());
            }
            let uuids: Vec<String> = page.into_iter().map(|r| r.uuid).collect();
            self.client.bulk_delete_metadata(&uuids).await?;
        }
    }
}

#[async_trait]
impl StageAction for Finisher {
    fn stage(&self) -> &'static str {
        "finisher"
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;

        self.drop_metadata(&bundle.uuid).await?;

        // is every sibling already finished? (this bundle advances right
        // after we return)
        let siblings = self.client.bundles_for_request(&bundle.request).await?;
        let mut all_finished = true;
        for uuid in &siblings {
            if uuid == &bundle.uuid {
                continue;
            }
            let sibling = self.client.get_bundle(uuid).await?;
            tracing::info!("Bundle {} has status {}", uuid, sibling.status.as_str());
            if sibling.status != BundleStatus::Finished {
                all_finished = false;
                break;
            }
        }

        if all_finished {
            tracing::info!(
                "all {} bundles of TransferRequest {} have drained; finishing it",
                siblings.len(),
                bundle.request
            );
            self.client
                .patch_request(
                    &bundle.request,
                    &RequestPatch {
                        status: Some(RequestStatus::Finished),
                        ..Default::default()
                    },
                )
                .await?;
        }

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch::default())))
    }
}
