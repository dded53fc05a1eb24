//! Error types for Caselake services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingQuery,
    InvalidInput,

    // Provider errors (2xxx)
    TransientProvider,
    PermanentProvider,
    ProviderOutage,

    // Lake / checkpoint errors (3xxx)
    LakeError,
    StaleWrite,
    CheckpointError,

    // Query errors (4xxx)
    QueryTimeout,
    QueryFailed,

    // Tool errors (5xxx)
    ToolFailure,
    AllToolsFailed,

    // Composer errors (6xxx)
    ComposerBackend,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    QueueError,
    IndexUnavailable,

    // Rate limiting
    RateLimited,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("No query provided in the request")]
    MissingQuery,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // Provider errors
    #[error("Transient provider error: {message}")]
    TransientProvider { message: String },

    #[error("Permanent provider error: {message}")]
    PermanentProvider { message: String },

    #[error("Provider outage: all {attempted} requests in the batch failed")]
    ProviderOutage { attempted: usize },

    // Lake errors
    #[error("Lake store error: {message}")]
    Lake { message: String },

    #[error("Stale write rejected for {key}: incoming {incoming} <= stored {stored}")]
    StaleWrite {
        key: String,
        incoming: chrono::DateTime<chrono::Utc>,
        stored: chrono::DateTime<chrono::Utc>,
    },

    #[error("Checkpoint error: {message}")]
    Checkpoint { message: String },

    // Query errors
    #[error("Query execution timed out after {timeout_secs} seconds")]
    QueryTimeout { timeout_secs: u64 },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    // Tool errors
    #[error("Tool {tool} failed: {message}")]
    ToolFailure { tool: String, message: String },

    // Composer errors
    #[error("Generative backend error: {message}")]
    ComposerBackend { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Knowledge index unavailable: {message}")]
    IndexUnavailable { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Rate limiting
    #[error("Rate limit exceeded")]
    RateLimited,

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingQuery => ErrorCode::MissingQuery,
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::TransientProvider { .. } => ErrorCode::TransientProvider,
            AppError::PermanentProvider { .. } => ErrorCode::PermanentProvider,
            AppError::ProviderOutage { .. } => ErrorCode::ProviderOutage,
            AppError::Lake { .. } => ErrorCode::LakeError,
            AppError::StaleWrite { .. } => ErrorCode::StaleWrite,
            AppError::Checkpoint { .. } => ErrorCode::CheckpointError,
            AppError::QueryTimeout { .. } => ErrorCode::QueryTimeout,
            AppError::QueryFailed { .. } => ErrorCode::QueryFailed,
            AppError::ToolFailure { .. } => ErrorCode::ToolFailure,
            AppError::ComposerBackend { .. } => ErrorCode::ComposerBackend,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::IndexUnavailable { .. } => ErrorCode::IndexUnavailable,
            AppError::HttpClient(_) => ErrorCode::InternalError,
            AppError::RateLimited => ErrorCode::RateLimited,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingQuery
            | AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway - upstream dependencies
            AppError::ComposerBackend { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ProviderOutage { .. }
            | AppError::QueueError { .. }
            | AppError::IndexUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::QueryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Transient provider failures are retried; permanent ones are skipped.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientProvider { .. } | AppError::HttpClient(_))
    }
}

/// Structured error response for the HTTP surface: `{error, details?}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub code: ErrorCode,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: message,
            details: None,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Lake {
            message: err.to_string(),
        }
    }
}
