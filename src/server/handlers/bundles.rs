//! Bundle routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::ApiError;
use crate::models::{BundlePatch, BundleStatus, NewBundle};
use crate::repository::{BundleFilter, StoreError};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ListBundlesParams {
    pub request: Option<String>,
    pub status: Option<String>,
    pub verified: Option<bool>,
    pub location: Option<String>,
    pub after: Option<String>,
    pub limit: Option<u32>,
    /// Comma-separated field projection; bare uuids when absent.
    pub fields: Option<String>,
}

/// GET /Bundles
///
/// Returns bare uuids by default; `fields=` projects each bundle onto a
/// caller-chosen field subset for cheap dashboards.
pub async fn list_bundles(
    State(state): State<AppState>,
    Query(params): Query<ListBundlesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match &params.status {
        Some(s) => Some(
            BundleStatus::from_str(s)
                .ok_or_else(|| StoreError::Invalid(format!("unknown status {s}")))?,
        ),
        None => None,
    };
    let filter = BundleFilter {
        request: params.request.clone(),
        status,
        verified: params.verified,
        location: params.location.clone(),
        after: params.after.clone(),
        limit: params.limit,
    };
    let bundles = state.bundles.list(&filter)?;

    let results: Vec<serde_json::Value> = match &params.fields {
        None => bundles.iter().map(|b| json!(b.uuid)).collect(),
        Some(fields) => {
            let wanted: Vec<&str> = fields.split(',').map(str::trim).collect();
            bundles
                .iter()
                .map(|b| {
                    let full = serde_json::to_value(b).unwrap_or_default();
                    let mut projected = serde_json::Map::new();
                    for field in &wanted {
                        if let Some(value) = full.get(*field) {
                            projected.insert(field.to_string(), value.clone());
                        }
                    }
                    serde_json::Value::Object(projected)
                })
                .collect()
        }
    };
    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateBundles {
    pub bundles: Vec<NewBundle>,
}

/// POST /Bundles/actions/bulk_create
pub async fn bulk_create_bundles(
    State(state): State<AppState>,
    Json(body): Json<BulkCreateBundles>,
) -> Result<impl IntoResponse, ApiError> {
    let uuids = state.bundles.bulk_create(&body.bundles)?;
    for uuid in &uuids {
        tracing::info!("created Bundle {uuid}");
    }
    Ok((
        StatusCode::CREATED,
        Json(json!({ "bundles": uuids, "count": uuids.len() })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BundlePopParams {
    pub source: Option<String>,
    pub dest: Option<String>,
    pub status: String,
}

/// POST /Bundles/actions/pop?source=&dest=&status=
pub async fn pop_bundle(
    State(state): State<AppState>,
    Query(params): Query<BundlePopParams>,
    Json(body): Json<super::PopBody>,
) -> Result<impl IntoResponse, ApiError> {
    if params.source.is_none() && params.dest.is_none() {
        return Err(StoreError::Invalid("missing source and dest fields".to_string()).into());
    }
    let status = BundleStatus::from_str(&params.status)
        .ok_or_else(|| StoreError::Invalid(format!("unknown status {}", params.status)))?;
    let bundle = state.bundles.pop(
        status,
        params.source.as_deref(),
        params.dest.as_deref(),
        &body.claimant,
    )?;
    match &bundle {
        Some(b) => tracing::info!("Bundle {} claimed by {}", b.uuid, body.claimant),
        None => tracing::info!(
            "no unclaimed Bundle with status {} matched the pop",
            params.status
        ),
    }
    Ok(Json(json!({ "bundle": bundle })))
}

/// GET /Bundles/{uuid}
pub async fn get_bundle(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = state.bundles.get(&uuid)?;
    Ok(Json(bundle))
}

/// PATCH /Bundles/{uuid}
pub async fn patch_bundle(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(patch): Json<BundlePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = state.bundles.patch(&uuid, &patch)?;
    tracing::info!("patched Bundle {uuid}");
    Ok(Json(bundle))
}

/// DELETE /Bundles/{uuid}
pub async fn delete_bundle(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.bundles.delete(&uuid)?;
    // drop the side-table with the bundle
    state.metadata.delete_for_bundle(&uuid)?;
    tracing::info!("deleted Bundle {uuid}");
    Ok(StatusCode::NO_CONTENT)
}
