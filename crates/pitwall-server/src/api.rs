//! Shared API error handling and fallback handlers.

use crate::config::Environment;
use axum::{
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Json,
    },
    http::{header::ALLOW, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use std::fmt::{Debug, Display};
use thiserror::Error;

/// API error type mapping to HTTP status codes.
///
/// Every variant renders as `{"error": "..."}`. Internal errors add a
/// `detail` field only when the server runs in development mode.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("internal server error: {message}")]
    Internal {
        message: String,
        detail: Option<String>,
    },
}

impl ApiError {
    /// Logs `err` and wraps it as a 500 response.
    pub fn internal<E: Display + Debug>(environment: Environment, context: &str, err: E) -> Self {
        tracing::error!(error = %err, context, "request failed");
        ApiError::Internal {
            message: format!("{context}: {err}"),
            detail: environment
                .is_development()
                .then(|| format!("{err:?}")),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Internal { message, detail } => {
                let mut body = json!({ "error": message });
                if let Some(detail) = detail {
                    body["detail"] = Value::String(detail);
                }
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

/// Method fallback for the event routes.
pub async fn method_not_allowed_handler() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(ALLOW, crate::middleware::ALLOWED_METHODS)],
        Json(json!({ "error": "method not allowed" })),
    )
        .into_response()
}

/// Router fallback for unknown paths.
pub async fn not_found_handler() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}
