//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::usage::UsageError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Gateway error: {0}")]
    BadGateway(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway(_) => "BAD_GATEWAY",
        }
    }

    /// Categorize an anyhow error into the appropriate ApiError variant by
    /// matching on the error message.
    ///
    /// Patterns recognized:
    /// - "not found" -> NotFound
    /// - "invalid" / "must" / "cannot" / "does not exist" -> BadRequest
    /// - "unavailable" / "connection refused" -> ServiceUnavailable
    /// - Default -> Internal
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let msg = format!("{err:#}");
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("not found") {
            ApiError::NotFound(msg)
        } else if msg_lower.contains("invalid")
            || msg_lower.contains("must")
            || msg_lower.contains("cannot")
            || msg_lower.contains("does not exist")
        {
            ApiError::BadRequest(msg)
        } else if msg_lower.contains("unavailable") || msg_lower.contains("connection refused") {
            ApiError::ServiceUnavailable(msg)
        } else {
            ApiError::Internal(msg)
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) | ApiError::BadGateway(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::ServiceUnavailable(msg) => {
                warn!(error_code = code, message = %msg, "Service unavailable");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

/// Convert anyhow errors to API errors using the centralized categorization.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(err)
    }
}

/// Convert usage collaborator errors to API errors.
impl From<UsageError> for ApiError {
    fn from(err: UsageError) -> Self {
        match err {
            UsageError::Credentials(msg) => {
                ApiError::ServiceUnavailable(format!("usage credentials unavailable: {msg}"))
            }
            UsageError::RequestFailed(e) => ApiError::BadGateway(e.to_string()),
            UsageError::ApiStatus(status) => {
                ApiError::BadGateway(format!("usage API returned status {status}"))
            }
            UsageError::Parse(msg) => ApiError::BadGateway(msg),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
