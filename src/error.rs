use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Pool errors
    #[error("No proxy matches the requested filter")]
    NoProxiesAvailable,

    #[error("Proxy not found: {host}")]
    ProxyNotFound { host: String },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Ingestion errors
    #[error("Unknown candidate source kind: {0}")]
    UnknownSource(String),

    #[error("Source {name} failed: {reason}")]
    SourceFailed { name: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PoolError::InvalidRequest(_)
            | PoolError::InvalidProxyAddress(_)
            | PoolError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            PoolError::ProxyNotFound { .. } | PoolError::NoProxiesAvailable => {
                StatusCode::NOT_FOUND
            }

            // 502 Bad Gateway
            PoolError::SourceFailed { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            PoolError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            PoolError::Database(_)
            | PoolError::UnknownSource(_)
            | PoolError::Io(_)
            | PoolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
