use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use payment::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Errors surfaced to HTTP callers
#[derive(Debug)]
pub enum ApiError {
    // Request shape
    NotJson(String),
    InvalidAmount(String),
    InvalidCallbackUri(String),

    // Resource errors
    NotFound(String),

    // Rate limiting
    RateLimitExceeded,

    // Ledger connectivity
    LedgerUnavailable(String),

    // Internal errors
    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotJson(msg) => write!(f, "Not JSON: {}", msg),
            ApiError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            ApiError::InvalidCallbackUri(msg) => write!(f, "Invalid callback uri: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            ApiError::LedgerUnavailable(msg) => write!(f, "Ledger unavailable: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotJson(_) | ApiError::InvalidAmount(_) | ApiError::InvalidCallbackUri(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Known kinds map to a fixed sentence, anything
    /// else falls back to the error text.
    pub fn message(&self) -> String {
        match self {
            ApiError::NotJson(_) => "Request contains invalid JSON. Please use application/json.".to_string(),
            ApiError::InvalidCallbackUri(_) => "Invalid callback uri.".to_string(),
            ApiError::InvalidAmount(_) => {
                "Invalid amount to forward. Please provide a higher amount.".to_string()
            }
            ApiError::NotFound(_) => "No matches found in database.".to_string(),
            ApiError::InternalError(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error body: `{success: false, status, message}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub status: u16,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }

        let body = ErrorResponse {
            success: false,
            status: status.as_u16(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidAmount(msg) => ApiError::InvalidAmount(msg),
            PaymentError::InvalidCallbackUri(msg) => ApiError::InvalidCallbackUri(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;
