//! REST client for the coordinator, shared by workers and the admin CLI.
//!
//! Wraps `reqwest` with bearer-token handling and retry-with-backoff for
//! transient coordinator failures. Claim conflicts (409) are surfaced as
//! `ClientError::Conflict` and are never retried; the worker treats them
//! as "work has been reassigned, drop it".

mod token;

pub use token::{mint_token, TokenSource};

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::AuthCredentials;
use crate::models::{
    Bundle, BundlePatch, MetadataRecord, NewBundle, NewTransferRequest, RequestPatch,
    TransferRequest,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("claim conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("coordinator rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for the coordinator REST API.
pub struct CoordinatorClient {
    base: String,
    http: reqwest::Client,
    tokens: TokenSource,
    retries: u32,
}

impl CoordinatorClient {
    pub fn new(
        base_url: &str,
        auth: &AuthCredentials,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            http: http.clone(),
            tokens: TokenSource::from_credentials(auth, http),
            retries,
        })
    }

    /// Issue a request, retrying transient failures with backoff.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let mut attempt = 0u32;
        loop {
            let token = self.tokens.token().await?;
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token);
            if let Some(body) = &body {
                builder = builder.json(body);
            }

            let outcome = builder.send().await;
            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if status == StatusCode::NO_CONTENT {
                            return Ok(Value::Null);
                        }
                        return Ok(response.json().await.unwrap_or(Value::Null));
                    }
                    let message = response.text().await.unwrap_or_default();
                    match status {
                        StatusCode::CONFLICT => return Err(ClientError::Conflict(message)),
                        StatusCode::NOT_FOUND => return Err(ClientError::NotFound(url)),
                        s if s.is_server_error() && attempt < self.retries => {
                            tracing::warn!(
                                "coordinator returned {s} for {method} {path}; retrying"
                            );
                        }
                        s => {
                            return Err(ClientError::Rejected {
                                status: s.as_u16(),
                                message,
                            })
                        }
                    }
                }
                Err(e) if attempt < self.retries => {
                    tracing::warn!("request to {url} failed ({e}); retrying");
                }
                Err(e) => return Err(ClientError::Http(e)),
            }

            attempt += 1;
            let backoff = Duration::from_millis(250 * 2u64.saturating_pow(attempt.min(6)));
            tokio::time::sleep(backoff).await;
        }
    }

    // ---- transfer requests ----

    pub async fn create_request(&self, new: &NewTransferRequest) -> Result<String> {
        let response = self
            .request(
                Method::POST,
                "/TransferRequests",
                Some(serde_json::to_value(new).unwrap_or_default()),
            )
            .await?;
        response["TransferRequest"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("missing TransferRequest uuid".to_string()))
    }

    pub async fn list_requests(&self) -> Result<Vec<TransferRequest>> {
        let response = self.request(Method::GET, "/TransferRequests", None).await?;
        serde_json::from_value(response["results"].clone())
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn get_request(&self, uuid: &str) -> Result<TransferRequest> {
        let response = self
            .request(Method::GET, &format!("/TransferRequests/{uuid}"), None)
            .await?;
        serde_json::from_value(response).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn pop_request(
        &self,
        source: Option<&str>,
        dest: Option<&str>,
        claimant: &str,
    ) -> Result<Option<TransferRequest>> {
        let mut path = "/TransferRequests/actions/pop".to_string();
        let mut query = Vec::new();
        if let Some(source) = source {
            query.push(format!("source={source}"));
        }
        if let Some(dest) = dest {
            query.push(format!("dest={dest}"));
        }
        if !query.is_empty() {
            path = format!("{path}?{}", query.join("&"));
        }
        let response = self
            .request(Method::POST, &path, Some(json!({ "claimant": claimant })))
            .await?;
        match &response["transfer_request"] {
            Value::Null => Ok(None),
            doc => serde_json::from_value(doc.clone())
                .map(Some)
                .map_err(|e| ClientError::Decode(e.to_string())),
        }
    }

    pub async fn patch_request(&self, uuid: &str, patch: &RequestPatch) -> Result<()> {
        self.request(
            Method::PATCH,
            &format!("/TransferRequests/{uuid}"),
            Some(serde_json::to_value(patch).unwrap_or_default()),
        )
        .await?;
        Ok(())
    }

    // ---- bundles ----

    pub async fn pop_bundle(
        &self,
        source: Option<&str>,
        dest: Option<&str>,
        status: &str,
        claimant: &str,
    ) -> Result<Option<Bundle>> {
        let mut query = vec![format!("status={status}")];
        if let Some(source) = source {
            query.push(format!("source={source}"));
        }
        if let Some(dest) = dest {
            query.push(format!("dest={dest}"));
        }
        let path = format!("/Bundles/actions/pop?{}", query.join("&"));
        let response = self
            .request(Method::POST, &path, Some(json!({ "claimant": claimant })))
            .await?;
        match &response["bundle"] {
            Value::Null => Ok(None),
            doc => serde_json::from_value(doc.clone())
                .map(Some)
                .map_err(|e| ClientError::Decode(e.to_string())),
        }
    }

    pub async fn get_bundle(&self, uuid: &str) -> Result<Bundle> {
        let response = self
            .request(Method::GET, &format!("/Bundles/{uuid}"), None)
            .await?;
        serde_json::from_value(response).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Uuids of all bundles spawned by a transfer request.
    pub async fn bundles_for_request(&self, request_uuid: &str) -> Result<Vec<String>> {
        let response = self
            .request(Method::GET, &format!("/Bundles?request={request_uuid}"), None)
            .await?;
        serde_json::from_value(response["results"].clone())
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn bulk_create_bundles(&self, bundles: &[NewBundle]) -> Result<Vec<String>> {
        let response = self
            .request(
                Method::POST,
                "/Bundles/actions/bulk_create",
                Some(json!({ "bundles": bundles })),
            )
            .await?;
        serde_json::from_value(response["bundles"].clone())
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn patch_bundle(&self, uuid: &str, patch: &BundlePatch) -> Result<()> {
        self.request(
            Method::PATCH,
            &format!("/Bundles/{uuid}"),
            Some(serde_json::to_value(patch).unwrap_or_default()),
        )
        .await?;
        Ok(())
    }

    // ---- metadata ----

    pub async fn bulk_create_metadata(
        &self,
        bundle_uuid: &str,
        files: &[String],
    ) -> Result<usize> {
        let response = self
            .request(
                Method::POST,
                "/Metadata/actions/bulk_create",
                Some(json!({ "bundle_uuid": bundle_uuid, "files": files })),
            )
            .await?;
        Ok(response["count"].as_u64().unwrap_or(0) as usize)
    }

    pub async fn metadata_for_bundle(
        &self,
        bundle_uuid: &str,
        limit: u32,
        skip: u32,
    ) -> Result<Vec<MetadataRecord>> {
        let response = self
            .request(
                Method::GET,
                &format!("/Metadata?bundle_uuid={bundle_uuid}&limit={limit}&skip={skip}"),
                None,
            )
            .await?;
        serde_json::from_value(response["results"].clone())
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn bulk_delete_metadata(&self, uuids: &[String]) -> Result<usize> {
        let response = self
            .request(
                Method::POST,
                "/Metadata/actions/bulk_delete",
                Some(json!({ "metadata": uuids })),
            )
            .await?;
        Ok(response["count"].as_u64().unwrap_or(0) as usize)
    }

    // ---- status ----

    /// Upsert this instance's heartbeat under its component type.
    pub async fn heartbeat(
        &self,
        component_type: &str,
        component_name: &str,
        payload: Value,
    ) -> Result<()> {
        self.request(
            Method::PATCH,
            &format!("/status/{component_type}"),
            Some(json!({ component_name: payload })),
        )
        .await?;
        Ok(())
    }

    pub async fn status_overview(&self) -> Result<Value> {
        self.request(Method::GET, "/status", None).await
    }

    pub async fn status_for_type(&self, component_type: &str) -> Result<Value> {
        self.request(Method::GET, &format!("/status/{component_type}"), None)
            .await
    }
}
