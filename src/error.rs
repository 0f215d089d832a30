//! Error handling for the parkwatch server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (malformed URL, out-of-range interval, bad bbox)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Conflict (conditional update claimed by another worker, duplicate key)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transient transport failure (RTSP connect/read, spawn race)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame arrived but could not be decoded, or the detector rejected it
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Task wall-deadline exceeded
    #[error("deadline")]
    Deadline,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the execution engine should retry this failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Short string recorded in the task `error` column. Pipeline errors
    /// record their bare message (`timeout`, not a prefixed variant name).
    pub fn task_error_string(&self) -> String {
        match self {
            Error::Deadline => "deadline".to_string(),
            Error::Transport(msg) | Error::Decoder(msg) | Error::Internal(msg) => {
                msg.chars().take(500).collect()
            }
            other => other.to_string().chars().take(500).collect(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::Transport(msg) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", msg.clone()),
            Error::Decoder(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DECODER_ERROR",
                msg.clone(),
            ),
            Error::Deadline => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DEADLINE",
                "deadline".to_string(),
            ),
            Error::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
