// Error handling module
// Defines error types surfaced by the backend client and the session

use thiserror::Error;

/// Errors that can occur while talking to the backend or managing the session
#[derive(Error, Debug)]
pub enum ApiError {
    /// Backend answered 401; the stored credential has already been cleared
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Backend could not be reached
    #[error("Network failure ({kind}): {message}")]
    Network { kind: &'static str, message: String },

    /// Request did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-2xx response other than 401
    #[error("Backend error: {status} - {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller passed a value the request cannot carry
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Build an error from a transport-level reqwest failure
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return ApiError::Timeout(e.to_string());
        }

        let kind = if e.is_connect() {
            "connection_failed"
        } else if e.is_request() {
            "request_error"
        } else if e.is_body() {
            "body_error"
        } else {
            "unknown"
        };

        ApiError::Network {
            kind,
            message: e.to_string(),
        }
    }

    /// True for 401 responses
    pub fn is_authorization_denied(&self) -> bool {
        matches!(self, ApiError::AuthorizationDenied(_))
    }

    /// HTTP status carried by the error, if the backend answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthorizationDenied(_) => Some(401),
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
