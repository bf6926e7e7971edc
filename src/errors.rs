use crate::services::{
    chunk_store::ChunkStoreError, drive::DriveError, history_service::HistoryError,
    transcriber::TranscribeError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<ChunkStoreError> for AppError {
    fn from(err: ChunkStoreError) -> Self {
        let status = match &err {
            ChunkStoreError::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ChunkStoreError::InvalidIndex { .. }
            | ChunkStoreError::InvalidTotal(_)
            | ChunkStoreError::InvalidSessionId
            | ChunkStoreError::InvalidFilename => StatusCode::BAD_REQUEST,
            ChunkStoreError::AssemblyFailed { .. } | ChunkStoreError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<TranscribeError> for AppError {
    fn from(err: TranscribeError) -> Self {
        let status = match &err {
            TranscribeError::MissingApiKey => StatusCode::SERVICE_UNAVAILABLE,
            TranscribeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.user_message())
    }
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        let status = match &err {
            DriveError::Unauthorized => StatusCode::UNAUTHORIZED,
            DriveError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<HistoryError> for AppError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound(_) => AppError::not_found(err.to_string()),
            HistoryError::Sqlx(err) => AppError::internal(err.to_string()),
        }
    }
}
