//! DefectDojo client errors

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when interacting with the DefectDojo API
#[derive(Debug, Error)]
pub enum DefectDojoError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// DefectDojo API returned an unexpected status
    #[error("DefectDojo API error ({status}): {message}")]
    Api {
        status: StatusCode,
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid token, bad credentials)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource could not be created because one with the same name exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid request (e.g., missing required fields, unreadable artifact)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DefectDojoError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, rate limiting and server-side errors are transient;
    /// everything the server rejected on its merits is not.
    pub fn is_transient(&self) -> bool {
        match self {
            DefectDojoError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DefectDojoError::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    pub(crate) fn api(status: StatusCode, message: impl Into<String>) -> Self {
        DefectDojoError::Api {
            status,
            message: message.into(),
        }
    }
}
