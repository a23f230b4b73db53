//! Metadata side-table routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::ApiError;
use crate::repository::StoreError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct MetadataListParams {
    pub bundle_uuid: Option<String>,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
}

/// GET /Metadata?bundle_uuid=&limit=&skip=
pub async fn list_metadata(
    State(state): State<AppState>,
    Query(params): Query<MetadataListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle_uuid = params
        .bundle_uuid
        .ok_or_else(|| StoreError::Invalid("bundle_uuid must not be empty".to_string()))?;
    let results = state.metadata.for_bundle(
        &bundle_uuid,
        params.limit.unwrap_or(1000),
        params.skip.unwrap_or(0),
    )?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct MetadataDeleteParams {
    pub bundle_uuid: Option<String>,
}

/// DELETE /Metadata?bundle_uuid=
pub async fn delete_metadata_for_bundle(
    State(state): State<AppState>,
    Query(params): Query<MetadataDeleteParams>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle_uuid = params
        .bundle_uuid
        .ok_or_else(|| StoreError::Invalid("bundle_uuid must not be empty".to_string()))?;
    state.metadata.delete_for_bundle(&bundle_uuid)?;
    tracing::info!("deleted all Metadata records for Bundle {bundle_uuid}");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateMetadata {
    pub bundle_uuid: String,
    pub files: Vec<String>,
}

/// POST /Metadata/actions/bulk_create
pub async fn bulk_create_metadata(
    State(state): State<AppState>,
    Json(body): Json<BulkCreateMetadata>,
) -> Result<impl IntoResponse, ApiError> {
    let uuids = state.metadata.bulk_create(&body.bundle_uuid, &body.files)?;
    tracing::info!(
        "created {} Metadata records for Bundle {}",
        uuids.len(),
        body.bundle_uuid
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "metadata": uuids, "count": uuids.len() })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteMetadata {
    pub metadata: Vec<String>,
}

/// POST /Metadata/actions/bulk_delete
pub async fn bulk_delete_metadata(
    State(state): State<AppState>,
    Json(body): Json<BulkDeleteMetadata>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state.metadata.bulk_delete(&body.metadata)?;
    Ok(Json(json!({ "metadata": body.metadata, "count": count })))
}

/// GET /Metadata/{uuid}
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.metadata.get(&uuid)?;
    Ok(Json(record))
}

/// DELETE /Metadata/{uuid}
pub async fn delete_metadata(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.metadata.delete(&uuid)?;
    tracing::info!("deleted Metadata {uuid}");
    Ok(StatusCode::NO_CONTENT)
}
