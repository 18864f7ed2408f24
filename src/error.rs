//! # HTTP Error Handling
//!
//! Error type for the HTTP surface (`/offer`, health and metrics routes)
//! and its mapping to JSON error responses. Pipeline failures never reach
//! this type: once a session is established the client only sees error
//! events on the data channel.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors surfaced as HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Client sent an invalid or malformed request (400).
    BadRequest(String),

    /// The process is above its session cap or the signaling backend is
    /// unavailable (503).
    ServiceUnavailable(String),

    /// Configuration loading or validation failed (500).
    ConfigError(String),

    /// Unexpected server-side failure (500).
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "service unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::Internal(msg) => ("internal_error", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
