pub mod health;
pub mod jobs;
pub mod metrics;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(rename = "transactionID")]
    pub transaction_id: String,

    /// Reserved for future use.
    #[serde(rename = "failedIDs", skip_serializing_if = "Option::is_none")]
    pub failed_ids: Option<Vec<String>>,
}

/// Errors exposed to HTTP callers. Anything not listed here is reported as
/// an opaque internal error; details stay in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorised,
    InvalidJobPriority,
    Internal,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub transaction_id: Uuid,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, transaction_id: Uuid) -> Self {
        Self {
            kind,
            transaction_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self.kind {
            ApiErrorKind::Unauthorised => (StatusCode::UNAUTHORIZED, "UNAUTHORISED"),
            ApiErrorKind::InvalidJobPriority => (StatusCode::BAD_REQUEST, "INVALID_JOB_PRIORITY"),
            ApiErrorKind::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
            }
        };

        let body = ErrorResponse {
            error: code.to_string(),
            transaction_id: self.transaction_id.to_string(),
            failed_ids: None,
        };

        (status, Json(body)).into_response()
    }
}
