//! Deleter: remove a staging copy once the pipeline no longer needs it.
//!
//! Deployed twice per archival pipeline: at the source (completed ->
//! source-deleted) and at the destination (source-deleted -> deleted);
//! the INPUT/OUTPUT statuses come from the environment like any other
//! stage. Deletion is idempotent so a retried claim after a crash
//! still succeeds.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::require_env;
use crate::models::BundlePatch;
use crate::pathutil::basename;
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

pub struct Deleter {
    base_path: PathBuf,
}

impl Deleter {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            base_path: PathBuf::from(require_env("DELETER_BASE_PATH")?),
        })
    }

    fn remove(&self, name: &str) -> Result<(), ActionError> {
        let target = self.base_path.join(name);
        match std::fs::remove_file(&target) {
            Ok(()) => {
                tracing::info!("deleted staging copy {}", target.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("staging copy {} already gone", target.display());
                Ok(())
            }
            Err(e) => Err(ActionError::Failed(format!(
                "could not delete {}: {e}",
                target.display()
            ))),
        }
    }
}

#[async_trait]
impl StageAction for Deleter {
    fn stage(&self) -> &'static str {
        "deleter"
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        let bundle_path = bundle
            .bundle_path
            .as_deref()
            .ok_or_else(|| ActionError::Failed("bundle has no artifact path".to_string()))?;
        let artifact = basename(bundle_path);
        self.remove(artifact)?;

        // the manifest sidecar goes with it
        let sidecar = format!("{}.metadata.json", artifact.trim_end_matches(".tar"));
        self.remove(&sidecar)?;

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch::default())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.tar"), b"x").unwrap();
        let deleter = Deleter {
            base_path: dir.path().to_path_buf(),
        };

        deleter.remove("b.tar").unwrap();
        assert!(!dir.path().join("b.tar").exists());
        // second removal of a missing file still succeeds
        deleter.remove("b.tar").unwrap();
    }
}
