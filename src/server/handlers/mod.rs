//! HTTP handlers for the coordinator API.

mod bundles;
mod metadata;
mod requests;
mod status;

pub use bundles::*;
pub use metadata::*;
pub use requests::*;
pub use status::*;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::repository::StoreError;

/// Error type all handlers funnel through; maps store errors onto the
/// HTTP contract (400 bad request, 404 not found, 409 conflict, 500
/// retryable).
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Database(e) => {
                tracing::error!("store error: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Root route; answers with an empty object so load balancers and humans
/// can see the service is up.
pub async fn main_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({}))
}
