pub mod admin;
pub mod weather;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

use crate::db::StoreError;

/// Route-level failures. "No data" is never one of these; readers get an
/// explicit empty view instead.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
