//! One place where domain errors become HTTP responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use sg_domain::Error;

pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response(),
            Error::InvalidRecord { issues } => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid record", "issues": issues })),
            )
                .into_response(),
            Error::Json(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON", "detail": e.to_string() })),
            )
                .into_response(),
            Error::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("Not found: {what}") })),
            )
                .into_response(),
            Error::Conflict(what) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": what })),
            )
                .into_response(),
            Error::Upstream(detail) => {
                tracing::error!(detail = %detail, "upstream failure");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "Upstream failure" })),
                )
                    .into_response()
            }
            other => {
                // Full detail stays in the logs; the body is generic.
                tracing::error!(error = %other, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal Server Error" })),
                )
                    .into_response()
            }
        }
    }
}
