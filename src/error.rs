//! Structured error type for the engine: one variant per error kind, each
//! carrying its own HTTP surface.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// C1: field-level and semantic violations, collected (not short-circuit).
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    /// C2: currency has no known rate, or rate lookup itself failed.
    #[error("fx conversion failed: {0}")]
    Fx(String),

    /// C8: authorizer must differ from requester.
    #[error("segregation of duties violated: {0}")]
    Segregation(String),

    /// C8: transition attempted from a state that does not permit it.
    #[error("invalid workflow transition: {0}")]
    InvalidTransition(String),

    /// C3/C7/C10: no matching row.
    #[error("not found: {0}")]
    NotFound(String),

    /// Database error surfaced by sqlx, retried once by the caller on
    /// transient failures, then mapped to 503.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// C4 rate/rule source, C9 notification endpoint.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Startup/env configuration problems.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(violations: Vec<String>) -> Self {
        ApiError::Validation(violations)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Fx(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Segregation(_) => StatusCode::CONFLICT,
            ApiError::InvalidTransition(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::Configuration(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn log(&self, request_id: &str) {
        match self.status_code() {
            status if status.is_server_error() => {
                error!(request_id = %request_id, error = %self, "request failed")
            }
            _ => warn!(request_id = %request_id, error = %self, "request rejected"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<String>,
    request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        self.log(&request_id);
        let status = self.status_code();

        let (error_kind, violations) = match &self {
            ApiError::Validation(v) => ("validation_error", v.clone()),
            ApiError::Fx(_) => ("fx_error", vec![]),
            ApiError::Segregation(_) => ("segregation_error", vec![]),
            ApiError::InvalidTransition(_) => ("invalid_transition", vec![]),
            ApiError::NotFound(_) => ("not_found", vec![]),
            ApiError::Database(_) => ("transient_db_error", vec![]),
            ApiError::ExternalService(_) => ("external_service_error", vec![]),
            ApiError::Configuration(_) => ("configuration_error", vec![]),
            ApiError::Internal(_) => ("internal_error", vec![]),
        };

        let body = ErrorBody {
            error: error_kind.to_string(),
            message: self.to_string(),
            violations,
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Converts an axum JSON extraction failure into the same error shape as a
/// validation failure, matching the teacher's rejection-handling idiom.
pub fn handle_json_rejection(err: JsonRejection) -> Response {
    ApiError::Validation(vec![err.body_text()]).into_response()
}
