use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::notice::Notice;

/// Failure reported by a gateway (record store, object store or auth provider).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("rejected by backend ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("malformed row: {0}")]
    Malformed(String),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

impl From<r2d2::Error> for GatewayError {
    fn from(e: r2d2::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => GatewayError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => GatewayError::Transport(e.to_string()),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => GatewayError::NotFound(e.to_string()),
            std::io::ErrorKind::AlreadyExists => GatewayError::Conflict(e.to_string()),
            _ => GatewayError::Transport(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Malformed(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum MemorialError {
    /// Missing field, bad file type or size. No remote call was made.
    #[error("{0}")]
    Validation(String),

    #[error("moderator privileges required")]
    Forbidden,

    #[error("sign in required")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    /// The feed is showing the local sample set and the action targets a sample entry.
    #[error("sample entries cannot be modified")]
    Degraded,

    #[error("another action is still in flight")]
    Busy,

    #[error("remote call failed: {0}")]
    Remote(#[from] GatewayError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MemorialError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MemorialError::Validation(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            MemorialError::Validation(_) => StatusCode::BAD_REQUEST,
            MemorialError::Forbidden => StatusCode::FORBIDDEN,
            MemorialError::Unauthorized => StatusCode::UNAUTHORIZED,
            MemorialError::NotFound(_) => StatusCode::NOT_FOUND,
            MemorialError::Degraded | MemorialError::Busy => StatusCode::CONFLICT,
            MemorialError::Remote(_) => StatusCode::BAD_GATEWAY,
            MemorialError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MemorialError::Validation(_) => "validation",
            MemorialError::Forbidden => "forbidden",
            MemorialError::Unauthorized => "unauthorized",
            MemorialError::NotFound(_) => "not_found",
            MemorialError::Degraded => "degraded",
            MemorialError::Busy => "busy",
            MemorialError::Remote(_) => "remote",
            MemorialError::Internal(_) => "internal",
        }
    }
}

/// An error paired with the notices the viewer should see alongside it.
pub struct ApiError {
    pub error: MemorialError,
    pub notices: Vec<Notice>,
}

impl From<MemorialError> for ApiError {
    fn from(error: MemorialError) -> Self {
        Self {
            error,
            notices: Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self.error {
            // remote details stay in the log
            MemorialError::Remote(_) | MemorialError::Internal(_) => {
                "something went wrong, please try again".to_string()
            }
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "error": self.error.code(),
            "message": message,
            "notices": self.notices,
        });
        (self.error.status(), Json(body)).into_response()
    }
}

impl IntoResponse for MemorialError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

pub type Result<T, E = MemorialError> = std::result::Result<T, E>;
