//! TransferRequest routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::ApiError;
use crate::models::{NewTransferRequest, RequestPatch};
use crate::server::AppState;

/// GET /TransferRequests
pub async fn list_requests(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let results = state.requests.list()?;
    Ok(Json(json!({ "results": results })))
}

/// POST /TransferRequests
pub async fn create_request(
    State(state): State<AppState>,
    Json(new): Json<NewTransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.requests.create(&new)?;
    tracing::info!("created TransferRequest {}", request.uuid);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "TransferRequest": request.uuid })),
    ))
}

/// GET /TransferRequests/{uuid}
pub async fn get_request(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.requests.get(&uuid)?;
    Ok(Json(request))
}

/// PATCH /TransferRequests/{uuid}
pub async fn patch_request(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(patch): Json<RequestPatch>,
) -> Result<impl IntoResponse, ApiError> {
    state.requests.patch(&uuid, &patch)?;
    tracing::info!("patched TransferRequest {uuid}");
    Ok(Json(json!({})))
}

/// DELETE /TransferRequests/{uuid}
pub async fn delete_request(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.requests.delete(&uuid)?;
    tracing::info!("deleted TransferRequest {uuid}");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PopParams {
    pub source: Option<String>,
    pub dest: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PopBody {
    pub claimant: String,
}

/// POST /TransferRequests/actions/pop?source=&dest=
pub async fn pop_request(
    State(state): State<AppState>,
    Query(params): Query<PopParams>,
    Json(body): Json<PopBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.requests.pop(
        params.source.as_deref(),
        params.dest.as_deref(),
        &body.claimant,
    )?;
    match &request {
        Some(r) => tracing::info!("TransferRequest {} claimed by {}", r.uuid, body.claimant),
        None => tracing::info!("no unclaimed TransferRequest matched the pop"),
    }
    Ok(Json(json!({ "transfer_request": request })))
}
