//! Tape-mover: write a received artifact from staging disk into the
//! HPSS tape system.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::require_env;
use crate::models::BundlePatch;
use crate::pathutil::basename;
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

use super::tape::{hpss_available, run_hsi, tape_path};

pub struct TapeMover {
    /// Staging disk where the replicator landed the artifact.
    rse_base_path: PathBuf,
    /// Root of the archive namespace on tape.
    tape_base_path: String,
    /// Availability probe binary.
    hpss_avail_path: PathBuf,
}

impl TapeMover {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            rse_base_path: PathBuf::from(require_env("RSE_BASE_PATH")?),
            tape_base_path: require_env("TAPE_BASE_PATH")?,
            hpss_avail_path: PathBuf::from(require_env("HPSS_AVAIL_PATH")?),
        })
    }
}

#[async_trait]
impl StageAction for TapeMover {
    fn stage(&self) -> &'static str {
        "tape-mover"
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
        let artifact = basename(bundle_path);
        let staged = self
            .rse_base_path
            .join(artifact)
            .to_string_lossy()
            .into_owned();
        let hpss_path = tape_path(&self.tape_base_path, &bundle.path, artifact);

        // create the destination directory, parents included
        let hpss_dir = hpss_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or(&self.tape_base_path);
        run_hsi(&["mkdir", "-p", hpss_dir]).await?;

        // put with tape-side sha512 calculation enabled, so the
        // tape-verifier can hashlist it later
        tracing::info!("writing {staged} to tape at {hpss_path}");
        run_hsi(&["put", "-c", "on", "-H", "sha512", &staged, ":", &hpss_path]).await?;

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch::default())))
    }
}
