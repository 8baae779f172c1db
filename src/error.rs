use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Huddle service
#[derive(Error, Debug)]
pub enum HuddleError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Meeting errors
    #[error("Meeting not found: {id}")]
    MeetingNotFound { id: String },

    #[error("Meeting is no longer active: {id}")]
    MeetingInactive { id: String },

    // Hub errors
    #[error("Connection has not identified itself")]
    Unidentified,

    #[error("Connection is already closed")]
    ConnectionClosed,

    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Huddle operations
pub type Result<T> = std::result::Result<T, HuddleError>;

impl HuddleError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            HuddleError::InvalidRequest(_)
            | HuddleError::InvalidConfig(_)
            | HuddleError::MeetingInactive { .. }
            | HuddleError::Unidentified => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            HuddleError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            HuddleError::MeetingNotFound { .. } => StatusCode::NOT_FOUND,

            // 410 Gone
            HuddleError::ConnectionClosed => StatusCode::GONE,

            // 503 Service Unavailable
            HuddleError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            HuddleError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            HuddleError::Database(_)
            | HuddleError::Io(_)
            | HuddleError::Serialization(_)
            | HuddleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for HuddleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<tokio::time::error::Elapsed> for HuddleError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        HuddleError::Timeout
    }
}
