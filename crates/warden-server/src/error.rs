//! API error types.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use warden_core::ErrorKind;

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, expired or invalid bearer token.
    #[error("{}", ErrorKind::Unauthorized.message())]
    Unauthorized(String),

    /// Token lacks the required role.
    #[error("{}", ErrorKind::Forbidden.message())]
    Forbidden(String),

    /// A check rejected its input or could not decide.
    #[error("{}", .0.message())]
    Decision(ErrorKind),

    /// Request body is not the expected JSON.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] warden_storage::StorageError),

    /// Cache dump failed.
    #[error("store error: {0}")]
    Store(#[from] warden_core::StoreError),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reauthenticate: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Decision(kind) => (
                StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                "decision_error",
            ),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Storage(_) | ApiError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
        };

        let reauthenticate = matches!(self, ApiError::Unauthorized(_));
        let body = ErrorResponse {
            status: "error",
            message: self.to_string(),
            code: code.to_string(),
            reauthenticate,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if reauthenticate {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_asks_for_reauthentication() {
        let response = ApiError::Unauthorized("expired".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn decision_errors_use_kind_status() {
        let response = ApiError::Decision(ErrorKind::InvalidFormat).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::Decision(ErrorKind::DecisionConflict).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn forbidden_has_no_challenge() {
        let response = ApiError::Forbidden("role".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
