//! Error types for tg-cloud-export
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Platform, Database, Config, etc.)
//! - The per-message [`FailureKind`] reported by the retry wrapper
//! - HTTP status code mapping for the trigger API
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for tg-cloud-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tg-cloud-export
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrency")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Messaging platform error (throttling, history, attachment download)
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Upload collaborator reported error text
    #[error("upload failed: {0}")]
    Upload(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested channel (or other resource) not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new export jobs
    #[error("shutdown in progress: not accepting new exports")]
    ShuttingDown,

    /// Network error talking to an upload service
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Operation not supported (missing binary, not configured, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors surfaced by the messaging platform client
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform demands that the caller wait before issuing more requests
    #[error("throttled by platform, retry after {}s", wait.as_secs())]
    Throttled {
        /// How long the platform asked us to wait
        wait: Duration,
    },

    /// The channel could not be opened (left, banned, private)
    #[error("channel {channel_id} unavailable: {reason}")]
    ChannelUnavailable {
        /// Channel that could not be opened
        channel_id: i64,
        /// Platform-provided reason
        reason: String,
    },

    /// History iteration failed
    #[error("history fetch failed: {0}")]
    History(String),

    /// Attachment download failed
    #[error("attachment download failed for message {message_id}: {reason}")]
    Download {
        /// Message whose attachment failed to download
        message_id: i64,
        /// Platform-provided reason
        reason: String,
    },
}

impl PlatformError {
    /// The wait the platform demanded, if this is a throttle signal
    pub fn throttle_wait(&self) -> Option<Duration> {
        match self {
            PlatformError::Throttled { wait } => Some(*wait),
            _ => None,
        }
    }
}

/// Kind of terminal per-message failure
///
/// Reported inside [`Outcome::Failed`](crate::types::Outcome::Failed). A failed
/// message is logged and counted but never blocks the batch it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Attachment could not be downloaded from the platform
    Download,
    /// Upload collaborator returned error text or could not be reached
    Upload,
    /// Processed-message record could not be written after a successful upload
    Record,
    /// Local staging directory could not be prepared
    Staging,
    /// Anything else
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Download => "download",
            FailureKind::Upload => "upload",
            FailureKind::Record => "record",
            FailureKind::Staging => "staging",
            FailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "not found: channel 'news'"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::NotFound(_) => 404,

            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - upstream collaborators
            Error::Platform(PlatformError::Throttled { .. }) => 429,
            Error::Platform(_) => 502,
            Error::Upload(_) => 502,
            Error::Network(_) => 502,

            Error::ShuttingDown => 503,
            Error::NotSupported(_) => 501,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Platform(e) => match e {
                PlatformError::Throttled { .. } => "throttled",
                PlatformError::ChannelUnavailable { .. } => "channel_unavailable",
                PlatformError::History(_) => "history_error",
                PlatformError::Download { .. } => "download_error",
            },
            Error::Upload(_) => "upload_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::NotSupported(_) => "not_supported",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Platform(PlatformError::Throttled { wait }) => Some(serde_json::json!({
                "retry_after_secs": wait.as_secs(),
            })),
            Error::Platform(PlatformError::ChannelUnavailable { channel_id, .. }) => {
                Some(serde_json::json!({
                    "channel_id": channel_id,
                }))
            }
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
