//! Client for the File Catalog, the external metadata service recording
//! where every file lives.
//!
//! The pipeline consults it for source inventory (picker, locator),
//! resolves individual records while bundling, and writes archived
//! replicas back (tape-verifier, unpacker).

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{ClientError, Result, TokenSource};
use crate::config::AuthCredentials;

/// Page size for catalog queries.
const QUERY_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogChecksum {
    pub sha512: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adler32: Option<String>,
}

/// A File Catalog record, restricted to the keys the pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub uuid: String,
    /// Warehouse (or tape) path of the file.
    pub logical_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<CatalogChecksum>,
}

/// Client for the File Catalog REST API.
pub struct FileCatalogClient {
    base: String,
    http: reqwest::Client,
    tokens: TokenSource,
    retries: u32,
}

impl FileCatalogClient {
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

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let mut attempt = 0u32;
        loop {
            let token = self.tokens.token().await?;
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .query(query)
                .bearer_auth(&token);
            if let Some(body) = &body {
                builder = builder.json(body);
            }
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await.unwrap_or(Value::Null));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(ClientError::NotFound(url));
                    }
                    let message = response.text().await.unwrap_or_default();
                    if status.is_server_error() && attempt < self.retries {
                        tracing::warn!("file catalog returned {status} for {path}; retrying");
                    } else {
                        return Err(ClientError::Rejected {
                            status: status.as_u16(),
                            message,
                        });
                    }
                }
                Err(e) if attempt < self.retries => {
                    tracing::warn!("file catalog request failed ({e}); retrying");
                }
                Err(e) => return Err(ClientError::Http(e)),
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(250 * 2u64.saturating_pow(attempt.min(6))))
                .await;
        }
    }

    /// Page through every record matching `query`.
    async fn query_all(&self, query: Value) -> Result<Vec<CatalogRecord>> {
        let query_str =
            serde_json::to_string(&query).map_err(|e| ClientError::Decode(e.to_string()))?;
        let mut records = Vec::new();
        let mut start = 0usize;
        loop {
            let response = self
                .request(
                    Method::GET,
                    "/api/files",
                    &[
                        ("query", query_str.clone()),
                        ("keys", "uuid|logical_name|file_size|checksum".to_string()),
                        ("limit", QUERY_PAGE_SIZE.to_string()),
                        ("start", start.to_string()),
                    ],
                    None,
                )
                .await?;
            let page: Vec<CatalogRecord> =
                serde_json::from_value(response["files"].clone())
                    .map_err(|e| ClientError::Decode(e.to_string()))?;
            let count = page.len();
            records.extend(page);
            if count < QUERY_PAGE_SIZE {
                return Ok(records);
            }
            start += count;
        }
    }

    /// All files recorded at `site` under the dataset path.
    pub async fn files_under_path(&self, site: &str, path: &str) -> Result<Vec<CatalogRecord>> {
        self.query_all(json!({
            "locations.site": site,
            "logical_name": { "$regex": format!("^{path}") },
        }))
        .await
    }

    /// Archived bundle records at `site` covering the dataset path.
    pub async fn archived_bundles_under_path(
        &self,
        site: &str,
        path: &str,
    ) -> Result<Vec<CatalogRecord>> {
        self.query_all(json!({
            "locations.site": site,
            "locations.archive": true,
            "lta.path": { "$regex": format!("^{path}") },
        }))
        .await
    }

    pub async fn get_file(&self, uuid: &str) -> Result<CatalogRecord> {
        let response = self
            .request(Method::GET, &format!("/api/files/{uuid}"), &[], None)
            .await?;
        serde_json::from_value(response).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Add a replica location to an existing record. The catalog
    /// de-duplicates locations server-side.
    pub async fn add_location(&self, uuid: &str, site: &str, path: &str) -> Result<()> {
        self.request(
            Method::POST,
            &format!("/api/files/{uuid}/locations"),
            &[],
            Some(json!({
                "locations": [ { "site": site, "path": path } ],
            })),
        )
        .await?;
        Ok(())
    }

    /// Register an archived bundle as its own catalog record.
    pub async fn register_archived_bundle(&self, record: Value) -> Result<()> {
        self.request(Method::POST, "/api/files", &[], Some(record))
            .await?;
        Ok(())
    }
}
