//! Heartbeat and dashboard routes.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use super::ApiError;
use crate::models::now;
use crate::server::AppState;

/// Component types surfaced by the tape-site dashboard.
const TAPE_COMPONENT_TYPES: [&str; 3] = ["tape-mover", "tape-retriever", "tape-verifier"];

/// PATCH /status/{component_type}
///
/// Body maps component names onto their status payloads:
/// `{ "node16-bundler": { "timestamp": "...", ... } }`.
pub async fn patch_status(
    State(state): State<AppState>,
    Path(component_type): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, ApiError> {
    for (component_name, payload) in &body {
        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(now);
        state
            .status
            .upsert(&component_type, component_name, &timestamp, payload)?;
        tracing::info!("heartbeat from {component_type} '{component_name}'");
    }
    Ok(Json(json!({})))
}

/// GET /status
///
/// Per-type health plus bundle counts per status. A component type is OK
/// when at least one instance heartbeat landed inside the stale window.
pub async fn get_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let mut components = Map::new();
    let mut all_ok = true;
    for (component_type, latest) in state.status.latest_per_type()? {
        let ok = chrono::DateTime::parse_from_rfc3339(&latest)
            .map(|ts| {
                (chrono::Utc::now() - ts.with_timezone(&chrono::Utc)).num_seconds()
                    <= state.heartbeat_stale_seconds
            })
            .unwrap_or(false);
        all_ok &= ok;
        components.insert(
            component_type,
            json!({ "timestamp": latest, "status": if ok { "OK" } else { "WARN" } }),
        );
    }

    let mut bundle_counts = Map::new();
    for (status, count) in state.bundles.status_counts()? {
        bundle_counts.insert(status, json!(count));
    }

    Ok(Json(json!({
        "health": if all_ok { "OK" } else { "WARN" },
        "components": components,
        "bundles": bundle_counts,
    })))
}

/// GET /status/{component_type}
pub async fn get_status_for_type(
    State(state): State<AppState>,
    Path(component_type): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if component_type == "nersc" {
        return Ok(Json(tape_dashboard(&state)?));
    }
    let statuses = state.status.for_type(&component_type)?;
    if statuses.is_empty() {
        return Err(crate::repository::StoreError::NotFound(format!(
            "component type {component_type}"
        ))
        .into());
    }
    let mut body = Map::new();
    for status in statuses {
        let stale = status.is_stale(state.heartbeat_stale_seconds);
        body.insert(
            status.component_name,
            json!({
                "timestamp": status.timestamp,
                "stale": stale,
                "payload": status.payload,
            }),
        );
    }
    Ok(Json(Value::Object(body)))
}

/// GET /status/{component_type}/count
pub async fn get_status_count(
    State(state): State<AppState>,
    Path(component_type): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state.status.count_for_type(&component_type)?;
    Ok(Json(
        json!({ "component_type": component_type, "count": count }),
    ))
}

/// Aggregate payloads of the tape-site components (served as
/// GET /status/nersc).
fn tape_dashboard(state: &AppState) -> Result<Value, ApiError> {
    let mut body = Map::new();
    for component_type in TAPE_COMPONENT_TYPES {
        let mut instances = Map::new();
        for status in state.status.for_type(component_type)? {
            instances.insert(
                status.component_name,
                json!({ "timestamp": status.timestamp, "payload": status.payload }),
            );
        }
        body.insert(component_type.to_string(), Value::Object(instances));
    }
    Ok(Value::Object(body))
}
