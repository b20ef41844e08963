//! Application error type mapping orchestrator errors to HTTP responses.
//!
//! The status code comes from the error code table; the body carries only
//! the safe projection (code, user-facing message, retryability).

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conductor_types::error::{ErrorCode, OrchestratorError};
use uuid::Uuid;

use crate::http::response::ApiResponse;

#[derive(Debug)]
pub struct AppError(pub OrchestratorError);

impl AppError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError(OrchestratorError::new(ErrorCode::ValidationInvalidInput, message))
    }

    pub fn not_found(code: ErrorCode, what: &str, id: &str) -> Self {
        AppError(
            OrchestratorError::new(code, format!("{what} '{id}' not found"))
                .with_resource_id(id.to_string()),
        )
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        AppError(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::invalid_input(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::invalid_input(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::invalid_input(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = %self.0.code, error = %self.0, "request failed");
        } else {
            tracing::debug!(code = %self.0.code, error = %self.0, "request rejected");
        }

        let body = ApiResponse::error(self.0.to_safe(), Uuid::now_v7().to_string(), 0);
        (status, Json(body)).into_response()
    }
}
