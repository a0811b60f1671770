//! Error types for the chat service
//!
//! `ChatError` is the taxonomy shared by the matchmaker, the relay and the
//! gateway. `ApiError` wraps it for the HTTP surface.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;

use crate::filter::FilterError;

/// Errors produced by the pairing core
#[derive(Error, Debug)]
pub enum ChatError {
    /// The requester already owns a waiting or active session
    #[error("You are already in a chat")]
    AlreadyInSession,

    /// No session exists with the given id
    #[error("Chat session not found")]
    SessionNotFound,

    /// The session is waiting or ended and cannot take this operation
    #[error("Chat session is not active")]
    SessionNotActive,

    /// The caller is not one of the session's participants
    #[error("You are not in this chat")]
    NotAParticipant,

    /// Transient storage failure; the caller may retry
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// The content filter refused to process the text
    #[error("Message could not be filtered: {0}")]
    Filter(#[from] FilterError),

    /// Malformed request data
    #[error("{0}")]
    InvalidInput(String),
}

impl ChatError {
    /// Only transient storage failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Storage(err) if err.is_transient())
    }

    /// Message suitable for the `error` event sent back to a client.
    ///
    /// Storage details never leave the server.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Storage(_) => "Temporary storage problem, please retry".to_string(),
            ChatError::Filter(_) => "Message could not be sent".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Storage(DatabaseError::Query(err))
    }
}

/// Type alias for core results
pub type ChatResult<T> = Result<T, ChatError>;

/// Custom error type for the HTTP surface
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or invalid credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated but not allowed (banned account)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Error raised by the pairing core
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Chat(err) => {
                let status = match &err {
                    ChatError::AlreadyInSession | ChatError::SessionNotActive => {
                        StatusCode::CONFLICT
                    }
                    ChatError::SessionNotFound => StatusCode::NOT_FOUND,
                    ChatError::NotAParticipant => StatusCode::FORBIDDEN,
                    ChatError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                    ChatError::Filter(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                };
                (status, err.client_message())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
