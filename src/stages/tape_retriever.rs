//! Tape-retriever: recall a located bundle from tape onto staging disk.
//!
//! The retrieval counterpart of the tape-mover. Recalls can take hours
//! when the tape robot is busy; `MAX_CLAIM_AGE` is sized accordingly.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::require_env;
use crate::models::BundlePatch;
use crate::pathutil::basename;
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

use super::tape::{hpss_available, run_hsi};

pub struct TapeRetriever {
    rse_base_path: PathBuf,
    hpss_avail_path: PathBuf,
}

impl TapeRetriever {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            rse_base_path: PathBuf::from(require_env("RSE_BASE_PATH")?),
            hpss_avail_path: PathBuf::from(require_env("HPSS_AVAIL_PATH")?),
        })
    }
}

#[async_trait]
impl StageAction for TapeRetriever {
    fn stage(&self) -> &'static str {
        "tape-retriever"
    }

    async fn preflight(&self) -> bool {
        hpss_available(&self.hpss_avail_path).await
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        // for a located bundle the recorded path is the tape path
        let hpss_path = bundle
            .bundle_path
            .as_deref()
            .ok_or_else(|| ActionError::Failed("bundle has no tape path".to_string()))?;
        let staged = self.rse_base_path.join(basename(hpss_path));
        let staged_str = staged.to_string_lossy().into_owned();

        tracing::info!("recalling {hpss_path} from tape to {staged_str}");
        run_hsi(&["get", &staged_str, ":", hpss_path]).await?;

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch {
            bundle_path: Some(staged_str),
            ..Default::default()
        })))
    }
}
