//! Bundler: materialise a specified bundle as an archive on working disk.
//!
//! Streams the bundle's Metadata side-table, resolves each File Catalog
//! record, writes the manifest sidecar, builds the tar (manifest first),
//! computes checksums and moves the finished artifact to the outbox.
//! Partial artifacts from a prior crashed attempt are removed before
//! writing, so a retry produces identical bytes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::archive::{
    archive_file_name, build_archive, entry_name, manifest_file_name, write_manifest,
    BundleManifest, ManifestChecksum, ManifestFile,
};
use crate::catalog::FileCatalogClient;
use crate::checksum::file_checksums;
use crate::client::CoordinatorClient;
use crate::config::{require_env, WorkerConfig};
use crate::models::BundlePatch;
use crate::pathutil::move_file;
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

/// Metadata rows fetched per page.
const METADATA_CHUNK_SIZE: u32 = 1000;

pub struct Bundler {
    client: Arc<CoordinatorClient>,
    catalog: FileCatalogClient,
    workbox: PathBuf,
    outbox: PathBuf,
}

impl Bundler {
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
            workbox: PathBuf::from(require_env("BUNDLER_WORKBOX_PATH")?),
            outbox: PathBuf::from(require_env("BUNDLER_OUTBOX_PATH")?),
        })
    }

    /// Resolve the bundle's full file list from the Metadata side-table.
    async fn collect_files(&self, bundle_uuid: &str) -> Result<Vec<ManifestFile>, ActionError> {
        let mut files = Vec::new();
        let mut skip = 0u32;
        loop {
            let page = self
                .client
                .metadata_for_bundle(bundle_uuid, METADATA_CHUNK_SIZE, skip)
                .await?;
            if page.is_empty() {
                return Ok(files);
            }
            skip += page.len() as u32;
            for record in page {
                let fc = self
                    .catalog
                    .get_file(&record.file_catalog_uuid)
                    .await
                    .map_err(|e| {
                        ActionError::Failed(format!(
                            "file catalog record {} unavailable: {e}",
                            record.file_catalog_uuid
                        ))
                    })?;
                let sha512 = fc
                    .checksum
                    .as_ref()
                    .map(|c| c.sha512.clone())
                    .ok_or_else(|| {
                        ActionError::Failed(format!(
                            "catalog record {} has no sha512 checksum",
                            fc.uuid
                        ))
                    })?;
                files.push(ManifestFile {
                    uuid: fc.uuid,
                    logical_name: fc.logical_name,
                    file_size: fc.file_size,
                    checksum: ManifestChecksum { sha512 },
                });
            }
        }
    }
}

#[async_trait]
impl StageAction for Bundler {
    fn stage(&self) -> &'static str {
        "bundler"
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        tracing::info!(
            "building archive for Bundle {} ({} files from '{}')",
            bundle.uuid,
            bundle.file_count,
            bundle.source
        );

        let files = self.collect_files(&bundle.uuid).await?;
        if files.len() as u64 != bundle.file_count {
            return Err(ActionError::Failed(format!(
                "expected {} metadata records, found {}",
                bundle.file_count,
                files.len()
            )));
        }

        let manifest = BundleManifest::new(&bundle.uuid, files);
        let manifest_path = self.workbox.join(manifest_file_name(&bundle.uuid));
        write_manifest(&manifest_path, &manifest)
            .map_err(|e| ActionError::Failed(format!("could not write manifest: {e}")))?;

        let entries: Vec<(PathBuf, String)> = manifest
            .files
            .iter()
            .map(|f| {
                (
                    PathBuf::from(&f.logical_name),
                    entry_name(&f.logical_name, &bundle.path),
                )
            })
            .collect();
        let archive_path = self.workbox.join(archive_file_name(&bundle.uuid));
        tracing::info!("creating bundle archive at {}", archive_path.display());
        build_archive(&archive_path, &manifest_path, &entries)
            .map_err(|e| ActionError::Failed(format!("could not build archive: {e}")))?;

        let size = std::fs::metadata(&archive_path)
            .map_err(|e| ActionError::Failed(format!("could not stat archive: {e}")))?
            .len();
        tracing::info!("archive has size {size} bytes; computing checksums");
        let checksum = file_checksums(&archive_path)
            .map_err(|e| ActionError::Failed(format!("could not checksum archive: {e}")))?;

        // the sidecar travels with the artifact so verification and
        // unpacking can read the manifest without streaming the container
        let final_path = self.outbox.join(archive_file_name(&bundle.uuid));
        if final_path != archive_path {
            move_file(&archive_path, &final_path).map_err(|e| {
                ActionError::Failed(format!("could not move archive to outbox: {e}"))
            })?;
            move_file(
                &manifest_path,
                &self.outbox.join(manifest_file_name(&bundle.uuid)),
            )
            .map_err(|e| {
                ActionError::Failed(format!("could not move manifest to outbox: {e}"))
            })?;
        }
        tracing::info!("finished archive now at {}", final_path.display());

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch {
            bundle_path: Some(final_path.to_string_lossy().into_owned()),
            size: Some(size),
            checksum: Some(checksum),
            verified: Some(false),
            ..Default::default()
        })))
    }
}
