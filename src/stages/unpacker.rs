//! Unpacker: expand a retrieved archive into the data warehouse.
//!
//! Extracts the tar into the outbox, then moves each file to its
//! warehouse logical path (with an optional prefix remap), verifying
//! size and checksum against the manifest, and registers the new
//! location in the File Catalog.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::archive::{manifest_file_name, read_manifest, unpack_archive, verify_unpacked_file};
use crate::catalog::FileCatalogClient;
use crate::config::{optional_env, require_env, WorkerConfig};
use crate::models::BundlePatch;
use crate::pathutil::{basename, move_file, remap_path};
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

pub struct Unpacker {
    catalog: FileCatalogClient,
    workbox: PathBuf,
    outbox: PathBuf,
    /// Ordered prefix remaps applied to warehouse paths, from
    /// `PATH_MAP_JSON` (a JSON object of from -> to prefixes).
    path_map: Vec<(String, String)>,
    site: String,
}

impl Unpacker {
    pub fn from_env(config: &WorkerConfig) -> anyhow::Result<Self> {
        let catalog = FileCatalogClient::new(
            &require_env("FILE_CATALOG_REST_URL")?,
            &config.auth,
            config.work_timeout,
            config.work_retries,
        )?;
        let path_map = match optional_env("PATH_MAP_JSON") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)?;
                let map: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(&raw)?;
                map.into_iter()
                    .filter_map(|(from, to)| to.as_str().map(|t| (from, t.to_string())))
                    .collect()
            }
            None => Vec::new(),
        };
        Ok(Self {
            catalog,
            workbox: PathBuf::from(require_env("UNPACKER_WORKBOX_PATH")?),
            outbox: PathBuf::from(require_env("UNPACKER_OUTBOX_PATH")?),
            path_map,
            site: config.dest_site.clone(),
        })
    }
}

#[async_trait]
impl StageAction for Unpacker {
    fn stage(&self) -> &'static str {
        "unpacker"
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        let bundle_path = bundle
            .bundle_path
            .as_deref()
            .ok_or_else(|| ActionError::Failed("bundle has no artifact path".to_string()))?;
        let artifact = basename(bundle_path);
        let bundle_uuid = artifact.trim_end_matches(".tar");
        let archive_path = self.workbox.join(artifact);

        tracing::info!(
            "unpacking {} to {}",
            archive_path.display(),
            self.outbox.display()
        );
        unpack_archive(&archive_path, &self.outbox)
            .map_err(|e| ActionError::Failed(format!("could not unpack archive: {e}")))?;

        let manifest_path = self.outbox.join(manifest_file_name(bundle_uuid));
        let manifest = read_manifest(&manifest_path)
            .map_err(|e| ActionError::Failed(format!("could not read manifest: {e}")))?;

        let total = manifest.files.len();
        for (index, entry) in manifest.files.iter().enumerate() {
            let unpacked = self
                .outbox
                .join(crate::archive::entry_name(&entry.logical_name, &bundle.path));
            tracing::info!("file {}/{}: {}", index + 1, total, entry.logical_name);

            // size and checksum must match the manifest before the file
            // is allowed into the warehouse
            verify_unpacked_file(&unpacked, entry)
                .map_err(|e| ActionError::Failed(e.to_string()))?;

            let dest = remap_path(&entry.logical_name, &self.path_map);
            move_file(&unpacked, &dest).map_err(|e| {
                ActionError::Failed(format!("could not move {} to warehouse: {e}", entry.logical_name))
            })?;

            self.catalog
                .add_location(&entry.uuid, &self.site, &dest.to_string_lossy())
                .await
                .map_err(|e| {
                    ActionError::Failed(format!("could not register warehouse location: {e}"))
                })?;
        }

        std::fs::remove_file(&manifest_path)
            .map_err(|e| ActionError::Failed(format!("could not remove manifest: {e}")))?;

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch::default())))
    }
}
