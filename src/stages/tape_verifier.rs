//! Tape-verifier: confirm the tape copy and register the archived
//! replica in the File Catalog.
//!
//! Two independent checks against HPSS: `hashlist` (the checksum the
//! tape system recorded at write time must equal ours) and
//! `hashverify -A` (re-read the bytes from tape and compare). Only then
//! is the bundle registered in the catalog as an archived replica.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use crate::catalog::FileCatalogClient;
use crate::config::{require_env, WorkerConfig};
use crate::models::{now, BundlePatch};
use crate::pathutil::basename;
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

use super::tape::{hashverify_ok, hpss_available, parse_hashlist, run_hsi, tape_path};

pub struct TapeVerifier {
    catalog: FileCatalogClient,
    tape_base_path: String,
    hpss_avail_path: PathBuf,
    site: String,
}

impl TapeVerifier {
    pub fn from_env(config: &WorkerConfig) -> anyhow::Result<Self> {
        let catalog = FileCatalogClient::new(
            &require_env("FILE_CATALOG_REST_URL")?,
            &config.auth,
            config.work_timeout,
            config.work_retries,
        )?;
        Ok(Self {
            catalog,
            tape_base_path: require_env("TAPE_BASE_PATH")?,
            hpss_avail_path: PathBuf::from(require_env("HPSS_AVAIL_PATH")?),
            site: config.dest_site.clone(),
        })
    }
}

#[async_trait]
impl StageAction for TapeVerifier {
    fn stage(&self) -> &'static str {
        "tape-verifier"
    }

    async fn preflight(&self) -> bool {
        hpss_available(&self.hpss_avail_path).await
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        let bundle_path = bundle
            .bundle_path
            .as_deref()
            .ok_or_else(|| ActionError::Failed("bundle has no artifact path".to_string()))?;
        let checksum = bundle
            .checksum
            .as_ref()
            .ok_or_else(|| ActionError::Failed("bundle has no recorded checksum".to_string()))?;
        let hpss_path = tape_path(&self.tape_base_path, &bundle.path, basename(bundle_path));

        // what checksum did the tape system record at write time?
        let listed = run_hsi(&["-P", "hashlist", &hpss_path]).await?;
        let stored = parse_hashlist(&listed).ok_or_else(|| {
            ActionError::Failed(format!("no sha512 recorded on tape for {hpss_path}"))
        })?;
        if stored != checksum.sha512 {
            return Err(ActionError::Failed(format!(
                "tape checksum {stored} does not match recorded {}",
                checksum.sha512
            )));
        }

        // re-read the bytes from tape and let HPSS compare
        let verified = run_hsi(&["-P", "hashverify", "-A", &hpss_path]).await?;
        if !hashverify_ok(&verified) {
            return Err(ActionError::Failed(format!(
                "tape re-read verification failed for {hpss_path}"
            )));
        }
        tracing::info!("tape copy of Bundle {} verified at {hpss_path}", bundle.uuid);

        // register the archived replica so the locator can find it later
        let record = json!({
            "uuid": bundle.uuid,
            "logical_name": hpss_path,
            "checksum": { "sha512": checksum.sha512, "adler32": checksum.adler32 },
            "file_size": bundle.size.unwrap_or(0),
            "date_archived": now(),
            "locations": [
                {
                    "site": self.site,
                    "path": hpss_path,
                    "hpss": true,
                    "online": false,
                    "archive": true,
                }
            ],
            "lta": {
                "request": bundle.request,
                "source": bundle.source,
                "dest": bundle.dest,
                "path": bundle.path,
                "file_count": bundle.file_count,
            },
        });
        self.catalog
            .register_archived_bundle(record)
            .await
            .map_err(|e| {
                ActionError::Failed(format!("could not register archived bundle: {e}"))
            })?;

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch {
            verified: Some(true),
            ..Default::default()
        })))
    }
}
