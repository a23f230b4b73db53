//! Move-verifier: independently re-checksum the artifact received at the
//! destination site and compare against the checksum recorded when the
//! bundle was created.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::checksum::file_sha512;
use crate::config::{env_flag, require_env};
use crate::models::BundlePatch;
use crate::pathutil::basename;
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

pub struct MoveVerifier {
    dest_root: PathBuf,
    /// Lay the artifact out under its full warehouse path rather than
    /// flat in the destination root.
    use_full_bundle_path: bool,
}

impl MoveVerifier {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            dest_root: PathBuf::from(require_env("DEST_ROOT_PATH")?),
            use_full_bundle_path: env_flag("USE_FULL_BUNDLE_PATH"),
        })
    }

    fn received_path(&self, warehouse_path: &str, artifact: &str) -> PathBuf {
        if self.use_full_bundle_path {
            self.dest_root
                .join(warehouse_path.trim_start_matches('/'))
                .join(artifact)
        } else {
            self.dest_root.join(artifact)
        }
    }
}

#[async_trait]
impl StageAction for MoveVerifier {
    fn stage(&self) -> &'static str {
        "move-verifier"
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        let bundle_path = bundle
            .bundle_path
            .as_deref()
            .ok_or_else(|| ActionError::Failed("bundle has no artifact path".to_string()))?;
        let expected = bundle
            .checksum
            .as_ref()
            .ok_or_else(|| ActionError::Failed("bundle has no recorded checksum".to_string()))?;

        let received = self.received_path(&bundle.path, basename(bundle_path));
        tracing::info!("computing sha512 for received artifact {}", received.display());
        let actual = file_sha512(&received)
            .map_err(|e| ActionError::Failed(format!("could not read {}: {e}", received.display())))?;

        if actual != expected.sha512 {
            return Err(ActionError::Failed(format!(
                "checksum mismatch between creation and destination: {actual}"
            )));
        }
        tracing::info!("destination checksum matches; bundle verified at destination");

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch {
            bundle_path: Some(received.to_string_lossy().into_owned()),
            ..Default::default()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bundle, BundleStatus, Checksum};
    use tempfile::tempdir;

    fn bundle_with_checksum(bundle_path: &str, sha512: &str) -> Bundle {
        Bundle {
            uuid: "bundle-1".to_string(),
            request: "req-1".to_string(),
            source: "WIPAC".to_string(),
            dest: "NERSC".to_string(),
            path: "/data/exp/a".to_string(),
            bundle_path: Some(bundle_path.to_string()),
            size: Some(5),
            checksum: Some(Checksum {
                sha512: sha512.to_string(),
                adler32: "00000001".to_string(),
            }),
            file_count: 0,
            status: BundleStatus::Transferring,
            reason: String::new(),
            verified: false,
            claimed: true,
            claimant: Some("verifier-1".to_string()),
            claim_timestamp: Some(crate::models::now()),
            original_status: None,
            create_timestamp: crate::models::now(),
            update_timestamp: crate::models::now(),
            work_priority_timestamp: crate::models::now(),
        }
    }

    #[tokio::test]
    async fn test_matching_checksum_advances() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.tar"), b"alpha").unwrap();
        let sha = crate::checksum::file_sha512(&dir.path().join("b.tar")).unwrap();

        let action = MoveVerifier {
            dest_root: dir.path().to_path_buf(),
            use_full_bundle_path: false,
        };
        let outcome = action
            .execute(WorkItem::Bundle(bundle_with_checksum("/staging/b.tar", &sha)))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Advance(_)));
    }

    #[tokio::test]
    async fn test_mismatch_fails_with_reason() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.tar"), b"alpha").unwrap();

        let action = MoveVerifier {
            dest_root: dir.path().to_path_buf(),
            use_full_bundle_path: false,
        };
        let result = action
            .execute(WorkItem::Bundle(bundle_with_checksum(
                "/staging/b.tar",
                &"0".repeat(128),
            )))
            .await;
        match result {
            Err(ActionError::Failed(reason)) => {
                assert!(reason.contains("checksum mismatch"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_bundle_path_layout() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("data/exp/a");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("b.tar"), b"alpha").unwrap();
        let sha = crate::checksum::file_sha512(&nested.join("b.tar")).unwrap();

        let action = MoveVerifier {
            dest_root: dir.path().to_path_buf(),
            use_full_bundle_path: true,
        };
        let outcome = action
            .execute(WorkItem::Bundle(bundle_with_checksum("/staging/b.tar", &sha)))
            .await
            .unwrap();
        match outcome {
            Outcome::Advance(PatchSet::Bundle(patch)) => {
                assert_eq!(
                    patch.bundle_path.as_deref(),
                    Some(nested.join("b.tar").to_str().unwrap())
                );
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }
}
