//! Replicator: copy the staged artifact to the destination site.
//!
//! Two byte movers are supported, selected by the destination URL
//! scheme: HTTP(S)/WebDAV PUT, or a `globus-url-copy` subprocess for
//! gsiftp endpoints. Byte movers occasionally report failure after the
//! file has in fact landed, so a non-zero result is checked against
//! actual completion (remote length equals bundle size) before the
//! bundle is quarantined.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{env_parse, optional_env, require_env};
use crate::models::BundlePatch;
use crate::pathutil::basename;
use crate::worker::{ActionError, Outcome, PatchSet, StageAction, WorkItem};

pub struct Replicator {
    dest_url: String,
    timeout: Duration,
    /// HTTP(S) base for the completion probe when the mover itself is
    /// not HTTP (gsiftp storage usually exposes a WebDAV view too).
    verify_base_url: Option<String>,
    http: reqwest::Client,
}

impl Replicator {
    pub fn from_env() -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(env_parse("GRIDFTP_TIMEOUT", 1200)?);
        Ok(Self {
            dest_url: require_env("GRIDFTP_DEST_URL")?,
            timeout,
            verify_base_url: optional_env("REPLICATOR_VERIFY_BASE_URL"),
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn is_http(&self) -> bool {
        self.dest_url.starts_with("http://") || self.dest_url.starts_with("https://")
    }

    fn remote_url(&self, base: &str, artifact: &str) -> String {
        format!("{}/{artifact}", base.trim_end_matches('/'))
    }

    async fn put_http(&self, src: &Path, url: &str) -> Result<(), String> {
        let file = tokio::fs::File::open(src)
            .await
            .map_err(|e| format!("could not open {}: {e}", src.display()))?;
        let response = self
            .http
            .put(url)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| format!("PUT {url} failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("PUT {url} returned {}", response.status()));
        }
        Ok(())
    }

    async fn put_gridftp(&self, src: &Path, url: &str) -> Result<(), String> {
        let source_url = format!("file://{}", src.display());
        let child = Command::new("globus-url-copy")
            .args(["-fast", &source_url, url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| format!("transfer to {url} timed out"))?
            .map_err(|e| format!("could not spawn globus-url-copy: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "globus-url-copy exited {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    /// Whether the remote copy actually completed, judged by its length.
    async fn remote_complete(&self, artifact: &str, expected_size: u64) -> bool {
        let base = if self.is_http() {
            Some(self.dest_url.clone())
        } else {
            self.verify_base_url.clone()
        };
        let Some(base) = base else {
            return false;
        };
        let url = self.remote_url(&base, artifact);
        match self.http.head(&url).send().await {
            Ok(response) if response.status().is_success() => {
                response.content_length() == Some(expected_size)
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StageAction for Replicator {
    fn stage(&self) -> &'static str {
        "replicator"
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError> {
        let bundle = item.into_bundle()?;
        let bundle_path = bundle
            .bundle_path
            .as_deref()
            .ok_or_else(|| ActionError::Failed("bundle has no artifact path".to_string()))?;
        let artifact = basename(bundle_path);
        let src = Path::new(bundle_path);
        let url = self.remote_url(&self.dest_url, artifact);

        tracing::info!("sending {bundle_path} to {url}");
        let moved = if self.is_http() {
            self.put_http(src, &url).await
        } else {
            self.put_gridftp(src, &url).await
        };

        if let Err(mover_error) = moved {
            // spurious failure reports happen; trust the remote's word over
            // the mover's exit status
            let size = bundle.size.unwrap_or(0);
            if size > 0 && self.remote_complete(artifact, size).await {
                tracing::warn!(
                    "mover reported failure but {artifact} is complete at the \
                     destination ({mover_error})"
                );
            } else {
                return Err(ActionError::Failed(format!("transfer failed: {mover_error}")));
            }
        }

        Ok(Outcome::Advance(PatchSet::Bundle(BundlePatch::default())))
    }
}
