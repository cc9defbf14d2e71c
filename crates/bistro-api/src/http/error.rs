//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use bistro_core::EngineError;

use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Engine or storage failure.
    Engine(EngineError),
    /// Malformed request.
    Validation(String),
    /// Request conflicts with the thread's current state.
    Conflict(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    /// Status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Engine(EngineError::NotFound(_)) => (StatusCode::NOT_FOUND, "THREAD_NOT_FOUND"),
            AppError::Engine(EngineError::NothingToResume(_)) => {
                (StatusCode::CONFLICT, "NOTHING_TO_RESUME")
            }
            AppError::Engine(EngineError::Checkpoint(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CHECKPOINT_ERROR")
            }
            AppError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Engine(e) => e.to_string(),
            AppError::Validation(msg) | AppError::Conflict(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self.message(), "request failed");
        }
        (status, Json(ApiResponse::error(code, self.message()))).into_response()
    }
}
