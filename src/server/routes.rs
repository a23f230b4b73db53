//! Router configuration for the coordinator API.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::auth::auth_middleware;
use super::handlers;
use super::AppState;

/// Create the coordinator router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::main_handler))
        // TransferRequests
        .route(
            "/TransferRequests",
            get(handlers::list_requests).post(handlers::create_request),
        )
        .route("/TransferRequests/actions/pop", post(handlers::pop_request))
        .route(
            "/TransferRequests/:uuid",
            get(handlers::get_request)
                .patch(handlers::patch_request)
                .delete(handlers::delete_request),
        )
        // Bundles
        .route("/Bundles", get(handlers::list_bundles))
        .route(
            "/Bundles/actions/bulk_create",
            post(handlers::bulk_create_bundles),
        )
        .route("/Bundles/actions/pop", post(handlers::pop_bundle))
        .route(
            "/Bundles/:uuid",
            get(handlers::get_bundle)
                .patch(handlers::patch_bundle)
                .delete(handlers::delete_bundle),
        )
        // Metadata
        .route(
            "/Metadata",
            get(handlers::list_metadata).delete(handlers::delete_metadata_for_bundle),
        )
        .route(
            "/Metadata/actions/bulk_create",
            post(handlers::bulk_create_metadata),
        )
        .route(
            "/Metadata/actions/bulk_delete",
            post(handlers::bulk_delete_metadata),
        )
        .route(
            "/Metadata/:uuid",
            get(handlers::get_metadata).delete(handlers::delete_metadata),
        )
        // Status / dashboards
        .route("/status", get(handlers::get_status))
        .route(
            "/status/:component_type",
            get(handlers::get_status_for_type).patch(handlers::patch_status),
        )
        .route(
            "/status/:component_type/count",
            get(handlers::get_status_count),
        )
        .layer(middleware::from_fn(crate::metrics::count_requests))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
