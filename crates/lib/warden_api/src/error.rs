//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use warden_core::registration::RegistrationError;
use warden_core::store::StoreError;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// RFC 7591 error body for the registration endpoint.
#[derive(Debug, Serialize)]
pub struct RegistrationErrorResponse {
    pub error: String,
    pub error_description: String,
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    fn registration_response(e: &RegistrationError) -> Response {
        let (status, description) = match e {
            RegistrationError::Store(_) => {
                error!(error = %e, "registration store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            _ => (StatusCode::BAD_REQUEST, e.to_string()),
        };
        let body = Json(RegistrationErrorResponse {
            error: e.code().to_string(),
            error_description: description,
        });
        (status, body).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Registration(e) => return Self::registration_response(e),
            AppError::Upstream(m) => {
                error!(error = %m, "engine request failed");
                (StatusCode::BAD_GATEWAY, "bad_gateway", "Upstream engine unavailable")
            }
            AppError::Internal(m) => {
                error!(error = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::DbError(e) => AppError::Internal(e.to_string()),
        }
    }
}
