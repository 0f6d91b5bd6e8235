//! Mapping from coordinator errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use torusdb_core::Error;

/// Error envelope returned to clients, mirroring the wire format storage
/// nodes use so tooling can parse both uniformly.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<usize>,
}

/// Wrapper giving `torusdb_core::Error` an HTTP rendering.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, expected, actual) = match &self.0 {
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", None, None),
            Error::DimensionMismatch { expected, actual } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "DIMENSION_MISMATCH",
                Some(*expected),
                Some(*actual),
            ),
            Error::Unavailable { .. } | Error::EmptyRing => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", None, None)
            }
            Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", None, None),
            Error::InvalidConfig { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_CONFIG", None, None)
            }
            Error::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT", None, None),
            Error::Protocol { .. } => (StatusCode::BAD_GATEWAY, "PROTOCOL", None, None),
            Error::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", None, None),
        };
        let body = ErrorBody {
            kind,
            message: self.0.to_string(),
            expected,
            actual,
        };
        (status, Json(body)).into_response()
    }
}
