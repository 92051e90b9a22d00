use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Fanout hub
#[derive(Error, Debug)]
pub enum FanoutError {
    // Registry errors
    #[error("Connection id already registered: {id}")]
    DuplicateId { id: String },

    #[error("Connection not found: {id}")]
    NotFound { id: String },

    #[error("Recipient not found: {id}")]
    RecipientNotFound { id: String },

    // Bus errors
    #[error("Message bus unavailable: {0}")]
    BusUnavailable(String),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Fanout operations
pub type Result<T> = std::result::Result<T, FanoutError>;

impl FanoutError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            FanoutError::InvalidRequest(_)
            | FanoutError::MalformedMessage(_)
            | FanoutError::InvalidConfig(_)
            | FanoutError::Serialization(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            FanoutError::NotFound { .. } | FanoutError::RecipientNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            // 409 Conflict
            FanoutError::DuplicateId { .. } => StatusCode::CONFLICT,

            // 502 Bad Gateway
            FanoutError::Transport(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            FanoutError::BusUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            FanoutError::Io(_) | FanoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
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

// Implement IntoResponse for API error responses
impl IntoResponse for FanoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Every Redis failure is a bus failure from the hub's point of view
impl From<redis::RedisError> for FanoutError {
    fn from(err: redis::RedisError) -> Self {
        FanoutError::BusUnavailable(err.to_string())
    }
}

impl From<axum::Error> for FanoutError {
    fn from(err: axum::Error) -> Self {
        FanoutError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            FanoutError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            FanoutError::DuplicateId {
                id: "a".to_string()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            FanoutError::RecipientNotFound {
                id: "a".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            FanoutError::BusUnavailable("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            FanoutError::Transport("reset".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(FanoutError::NotFound {
            id: "x".to_string()
        }
        .is_client_error());
        assert!(!FanoutError::InvalidRequest("bad".to_string()).is_server_error());

        assert!(FanoutError::BusUnavailable("down".to_string()).is_server_error());
        assert!(!FanoutError::BusUnavailable("down".to_string()).is_client_error());
    }

    #[test]
    fn test_redis_error_maps_to_bus_unavailable() {
        let err: FanoutError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(matches!(err, FanoutError::BusUnavailable(_)));
    }
}
