//! Error types for the entity cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the entity cache.
///
/// Cloneable so that a single failed fetch can be handed to every caller
/// that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The remote fetch for a key failed
    #[error("Fetch failed for {key}: {message}")]
    Fetch { key: String, message: String },

    /// Durable storage could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// A payload could not be encoded for durable storage
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed cache key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The operation needs a principal and none is available
    #[error("No authenticated principal")]
    Unauthenticated,

    /// Internal failure (panicked fetch task and the like)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Builds a fetch error from any upstream failure.
    pub fn fetch(key: impl ToString, err: &anyhow::Error) -> Self {
        CacheError::Fetch {
            key: key.to_string(),
            message: format!("{:#}", err),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            CacheError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            CacheError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CacheError::Storage(_) | CacheError::Serialization(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the entity cache.
pub type Result<T> = std::result::Result<T, CacheError>;
