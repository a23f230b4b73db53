//! Rate-limiter: move bundle artifacts into the staging directory under
//! a quota.
//!
//! Limits how many bytes are "in flight" to a destination at once. A
//! bundle that would push the staging directory over quota is requeued,
//! not quarantined; so is a bundle whose artifact has not appeared in the
//! input directory yet.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::{require_env, ConfigError};
use crate::models::BundlePatch;
use crate::pathutil::{basename, directory_size, move_file};
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

pub struct RateLimiter {
    input_path: PathBuf,
    output_path: PathBuf,
    output_quota: u64,
}

impl RateLimiter {
    pub fn from_env() -> anyhow::Result<Self> {
        let quota = require_env("OUTPUT_QUOTA")?;
        Ok(Self {
            input_path: PathBuf::from(require_env("INPUT_PATH")?),
            output_path: PathBuf::from(require_env("OUTPUT_PATH")?),
            output_quota: quota.parse().map_err(|_| ConfigError::Invalid {
                name: "OUTPUT_QUOTA",
                value: quota,
            })?,
        })
    }
}

#[async_trait]
impl StageAction for RateLimiter {
    fn stage(&self) -> &'static str {
        "rate-limiter"
    }

    fn status_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "output_quota": self.output_quota,
            "output_usage": directory_size(&self.output_path),
        })
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        let bundle_path = bundle
            .bundle_path
            .as_deref()
            .ok_or_else(|| ActionError::Failed("bundle has no artifact path".to_string()))?;
        let artifact_name = basename(bundle_path);
        let src = self.input_path.join(artifact_name);

        if !src.exists() {
            tracing::info!(
                "artifact {} not present in {} yet; requeueing",
                artifact_name,
                self.input_path.display()
            );
            return Ok(Outcome::Requeue);
        }

        let output_usage = directory_size(&self.output_path);
        let bundle_size = bundle.size.unwrap_or(0);
        if output_usage + bundle_size > self.output_quota {
            tracing::info!(
                "staging {artifact_name} ({bundle_size} bytes) would exceed quota \
                 ({output_usage} of {} bytes used); requeueing",
                self.output_quota
            );
            return Ok(Outcome::Requeue);
        }

        let dst = self.output_path.join(artifact_name);
        tracing::info!("staging {} -> {}", src.display(), dst.display());
        move_file(&src, &dst)
            .map_err(|e| ActionError::Failed(format!("could not stage artifact: {e}")))?;

        // the manifest sidecar follows the artifact when present
        let sidecar = format!(
            "{}.metadata.json",
            artifact_name.trim_end_matches(".tar")
        );
        let sidecar_src = self.input_path.join(&sidecar);
        if sidecar_src.exists() {
            move_file(&sidecar_src, &self.output_path.join(&sidecar))
                .map_err(|e| ActionError::Failed(format!("could not stage sidecar: {e}")))?;
        }

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch {
            bundle_path: Some(dst.to_string_lossy().into_owned()),
            ..Default::default()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bundle, BundleStatus};
    use tempfile::tempdir;

    fn limiter(input: &std::path::Path, output: &std::path::Path, quota: u64) -> RateLimiter {
        RateLimiter {
            input_path: input.to_path_buf(),
            output_path: output.to_path_buf(),
            output_quota: quota,
        }
    }

    fn staged_bundle(bundle_path: &str, size: u64) -> Bundle {
        Bundle {
            uuid: "bundle-1".to_string(),
            request: "req-1".to_string(),
            source: "WIPAC".to_string(),
            dest: "NERSC".to_string(),
            path: "/data/exp/a".to_string(),
            bundle_path: Some(bundle_path.to_string()),
            size: Some(size),
            checksum: None,
            file_count: 0,
            status: BundleStatus::Created,
            reason: String::new(),
            verified: false,
            claimed: true,
            claimant: Some("rate-limiter-1".to_string()),
            claim_timestamp: Some(crate::models::now()),
            original_status: None,
            create_timestamp: crate::models::now(),
            update_timestamp: crate::models::now(),
            work_priority_timestamp: crate::models::now(),
        }
    }

    #[tokio::test]
    async fn test_moves_artifact_within_quota() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(input.join("b.tar"), vec![0u8; 10]).unwrap();

        let action = limiter(&input, &output, 1000);
        let outcome = action
            .execute(WorkItem::Bundle(staged_bundle("/work/outbox/b.tar", 10)))
            .await
            .unwrap();

        match outcome {
            Outcome::Advance(PatchSet::Bundle(patch)) => {
                assert_eq!(
                    patch.bundle_path.as_deref(),
                    Some(output.join("b.tar").to_str().unwrap())
                );
            }
            other => panic!("expected advance, got {other:?}"),
        }
        assert!(output.join("b.tar").exists());
        assert!(!input.join("b.tar").exists());
    }

    #[tokio::test]
    async fn test_requeues_when_quota_exceeded() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(input.join("b.tar"), vec![0u8; 10]).unwrap();
        std::fs::write(output.join("already-staged.tar"), vec![0u8; 95]).unwrap();

        let action = limiter(&input, &output, 100);
        let outcome = action
            .execute(WorkItem::Bundle(staged_bundle("/work/outbox/b.tar", 10)))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Requeue));
        assert!(input.join("b.tar").exists(), "artifact must stay put");
    }

    #[tokio::test]
    async fn test_requeues_missing_artifact() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();

        let action = limiter(&input, &output, 1000);
        let outcome = action
            .execute(WorkItem::Bundle(staged_bundle("/work/outbox/gone.tar", 10)))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Requeue));
    }
}
