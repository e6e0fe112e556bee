//! Maps `CoreError` (spec §7's six-kind taxonomy) onto HTTP status codes at
//! the handler boundary. Mirrors the teacher's `(StatusCode, Json<ErrorResponse>)`
//! handler return style.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::core::error::CoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            CoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::TransientUpstream(_) => (StatusCode::BAD_GATEWAY, "transient_upstream"),
            CoreError::Capacity(_) => (StatusCode::OK, "capacity"),
            CoreError::StateCorruption(_) => (StatusCode::INTERNAL_SERVER_ERROR, "state_corruption"),
            CoreError::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "fatal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::warn!(error = %self.0, "request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
                code,
            }),
        )
            .into_response()
    }
}
