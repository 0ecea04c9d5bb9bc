//! Error types for pool-sentinel.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate rule or channel registration
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// RPC/ledger error
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure for the API.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_response) = match &self {
            AppError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    status: "error",
                    reason: "configuration_error".to_string(),
                    details: Some(e.to_string()),
                },
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    status: "rejected",
                    reason: "validation_failed".to_string(),
                    details: Some(msg.clone()),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    status: "rejected",
                    reason: "not_found".to_string(),
                    details: Some(msg.clone()),
                },
            ),
            AppError::Duplicate(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    status: "rejected",
                    reason: "duplicate".to_string(),
                    details: Some(msg.clone()),
                },
            ),
            AppError::Ledger(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    status: "error",
                    reason: "ledger_error".to_string(),
                    details: Some(msg.clone()),
                },
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    status: "error",
                    reason: "internal_error".to_string(),
                    details: Some(msg.clone()),
                },
            ),
        };

        tracing::error!(
            error_type = %self,
            status_code = %status_code,
            "Request error"
        );

        (status_code, Json(json!(error_response))).into_response()
    }
}

/// Result type alias for convenience.
pub type AppResult<T> = Result<T, AppError>;
