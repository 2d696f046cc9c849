//! Error types for CareCircle
//!
//! Every variant maps to one HTTP status; the body is always `{"message": ...}`.

use hyper::StatusCode;
use serde_json::json;

/// Main error type for CareCircle operations
#[derive(Debug, thiserror::Error)]
pub enum CareError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{message}")]
    TooManyRequests { message: String, retry_after_secs: u64 },

    /// Store error whose text is safe to surface to the caller.
    #[error("{0}")]
    Database(String),

    /// The queried column/field does not exist in this deployment's schema.
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("{0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CareError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_)
            | Self::MissingField(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message exposed to the client.
    ///
    /// Store and storage messages pass through verbatim; internal and
    /// configuration details are replaced with a generic message.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(_) | Self::Auth(_) => "Unauthorized".to_string(),
            Self::Config(_) => "Service is not configured.".to_string(),
            Self::Internal(_) | Self::MissingField(_) => "Internal server error.".to_string(),
            other => other.to_string(),
        }
    }

    /// Convert to status code and JSON body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, serde_json::Value) {
        let status = self.status_code();
        let body = json!({ "message": self.public_message() });
        (status, body)
    }

    /// Whether this is the "column does not exist" condition.
    pub fn is_missing_field(&self) -> bool {
        matches!(self, Self::MissingField(_))
    }
}

impl From<std::io::Error> for CareError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CareError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("Invalid JSON: {}", err))
    }
}

impl From<hyper::Error> for CareError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for CareError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for CareError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

impl From<reqwest::Error> for CareError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// Result type alias for CareCircle operations
pub type Result<T> = std::result::Result<T, CareError>;
