//! Picker: expand a TransferRequest into bundles for archival.
//!
//! Queries the File Catalog for every file under the request path at the
//! source site, batches them by size and count, then bulk-creates the
//! bundle documents and their Metadata side-tables.

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{CatalogRecord, FileCatalogClient};
use crate::client::CoordinatorClient;
use crate::config::{env_parse, require_env, WorkerConfig};
use crate::models::{BundleStatus, NewBundle, RequestPatch};
use crate::worker::{ActionError, ClaimKind, Outcome, PatchSet, StageAction, WorkItem};

/// Metadata rows created per bulk_create call.
const METADATA_CHUNK_SIZE: usize = 1000;

/// Default size cap per bundle: 500 GiB.
const DEFAULT_MAX_BUNDLE_SIZE: u64 = 500 * 1024 * 1024 * 1024;

/// Default file-count cap per bundle.
const DEFAULT_MAX_BUNDLE_COUNT: usize = 20_000;

pub struct Picker {
    client: Arc<CoordinatorClient>,
    catalog: FileCatalogClient,
    max_bundle_size: u64,
    max_bundle_count: usize,
}

impl Picker {
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
        Ok(Self {
            client,
            catalog,
            max_bundle_size: env_parse("PICKER_MAX_BUNDLE_SIZE", DEFAULT_MAX_BUNDLE_SIZE)?,
            max_bundle_count: env_parse("PICKER_MAX_BUNDLE_COUNT", DEFAULT_MAX_BUNDLE_COUNT)?,
        })
    }
}

#[async_trait]
impl StageAction for Picker {
    fn stage(&self) -> &'static str {
        "picker"
    }

    fn claim_kind(&self) -> ClaimKind {
        ClaimKind::Requests
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let request = item.into_request()?;
        tracing::info!(
            "expanding TransferRequest {} ({} -> {} under {})",
            request.uuid,
            request.source,
            request.dest,
            request.path
        );

        let files = self
            .catalog
            .files_under_path(&request.source, &request.path)
            .await
            .map_err(|e| ActionError::Failed(format!("file catalog query failed: {e}")))?;
        if files.is_empty() {
            return Err(ActionError::Failed(
                "no files in catalog under path".to_string(),
            ));
        }
        tracing::info!("catalog lists {} files under {}", files.len(), request.path);

        let batches = batch_files(&files, self.max_bundle_size, self.max_bundle_count);
        for batch in &batches {
            let new = NewBundle {
                request: request.uuid.clone(),
                source: request.source.clone(),
                dest: request.dest.clone(),
                path: request.path.clone(),
                status: BundleStatus::Specified,
                file_count: batch.len() as u64,
                bundle_path: None,
                size: None,
                checksum: None,
            };
            let uuids = self
                .client
                .bulk_create_bundles(std::slice::from_ref(&new))
                .await
                .map_err(|e| ActionError::Failed(format!("could not create bundle: {e}")))?;
            let bundle_uuid = &uuids[0];

            let file_uuids: Vec<String> = batch.iter().map(|f| f.uuid.clone()).collect();
            for chunk in file_uuids.chunks(METADATA_CHUNK_SIZE) {
                self.client
                    .bulk_create_metadata(bundle_uuid, chunk)
                    .await
                    .map_err(|e| {
                        ActionError::Failed(format!("could not create metadata: {e}"))
                    })?;
            }
            tracing::info!(
                "created Bundle {bundle_uuid} covering {} files",
                batch.len()
            );
        }

        // the request stays in processing until its bundles drain
        Ok(Outcome::Advance(PatchSet::Request(RequestPatch::default())))
    }
}

/// Greedy batching by total size and file count, preserving catalog order.
fn batch_files(
    files: &[CatalogRecord],
    max_size: u64,
    max_count: usize,
) -> Vec<Vec<&CatalogRecord>> {
    let mut batches = Vec::new();
    let mut current: Vec<&CatalogRecord> = Vec::new();
    let mut current_size = 0u64;
    for file in files {
        let overflows = !current.is_empty()
            && (current_size + file.file_size > max_size || current.len() >= max_count);
        if overflows {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += file.file_size;
        current.push(file);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uuid: &str, size: u64) -> CatalogRecord {
        CatalogRecord {
            uuid: uuid.to_string(),
            logical_name: format!("/data/exp/{uuid}"),
            file_size: size,
            checksum: None,
        }
    }

    #[test]
    fn test_batching_by_size() {
        let files = vec![record("a", 60), record("b", 50), record("c", 10)];
        let batches = batch_files(&files, 100, 100);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1); // a alone: a+b would exceed 100
        assert_eq!(batches[1].len(), 2); // b and c fit together
    }

    #[test]
    fn test_batching_by_count() {
        let files: Vec<CatalogRecord> =
            (0..5).map(|i| record(&format!("f{i}"), 1)).collect();
        let batches = batch_files(&files, u64::MAX, 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn test_oversized_file_gets_its_own_batch() {
        let files = vec![record("huge", 1000), record("tiny", 1)];
        let batches = batch_files(&files, 100, 100);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].uuid, "huge");
    }
}
