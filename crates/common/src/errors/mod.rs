//! Error types for GeoResolve
//!
//! Two layers:
//! - `EngineError`: cloneable failures raised by engine sessions and tickets
//! - `AppError`: the pipeline taxonomy surfaced to callers, with
//!   machine-readable codes and HTTP status mapping for the gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Failures reported by an engine session or one of its tickets.
///
/// Tickets may be awaited more than once, so every variant carries owned,
/// cloneable data rather than the transport's own error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("engine rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("ticket {ticket} failed: {message}")]
    TicketFailed { ticket: String, message: String },

    #[error("gave up waiting for ticket {ticket} after {timeout_ms}ms")]
    TimedOut { ticket: String, timeout_ms: u64 },

    #[error("credentials error: {message}")]
    Credentials { message: String },

    #[error("handle {handle} does not belong to session {session}")]
    ForeignHandle { handle: String, session: String },

    #[error("malformed engine response: {message}")]
    Protocol { message: String },
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport {
            message: err.to_string(),
        }
    }
}

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Engine pipeline errors (2xxx)
    ConnectionError,
    ContextResolutionError,
    ObservableResolutionError,
    ResolutionTimeout,
    ExportError,

    // Rate limiting (6xxx)
    RateLimited,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::ConnectionError => 2001,
            ErrorCode::ContextResolutionError => 2002,
            ErrorCode::ObservableResolutionError => 2003,
            ErrorCode::ResolutionTimeout => 2004,
            ErrorCode::ExportError => 2005,

            ErrorCode::RateLimited => 6001,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Pipeline errors
    #[error("Could not establish a live engine session after {attempts} attempt(s)")]
    Connection { attempts: usize },

    #[error("Context resolution failed: {0}")]
    ContextResolution(#[source] EngineError),

    #[error("Observable resolution failed: {0}")]
    ObservableResolution(#[source] EngineError),

    #[error("Export to {path} failed: {message}")]
    Export { path: String, message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },
}

impl AppError {
    /// Shorthand for a validation failure on a named input field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Connection { .. } => ErrorCode::ConnectionError,
            AppError::ContextResolution(EngineError::TimedOut { .. })
            | AppError::ObservableResolution(EngineError::TimedOut { .. }) => {
                ErrorCode::ResolutionTimeout
            }
            AppError::ContextResolution(_) => ErrorCode::ContextResolutionError,
            AppError::ObservableResolution(_) => ErrorCode::ObservableResolutionError,
            AppError::Export { .. } => ErrorCode::ExportError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            // 400 Bad Request
            ErrorCode::ValidationError | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway
            ErrorCode::ContextResolutionError | ErrorCode::ObservableResolutionError => {
                StatusCode::BAD_GATEWAY
            }

            // 504 Gateway Timeout
            ErrorCode::ResolutionTimeout => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable
            ErrorCode::ConnectionError | ErrorCode::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            ErrorCode::ExportError | ErrorCode::InternalError | ErrorCode::ConfigurationError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
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
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
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

        let field = match self {
            AppError::Validation { field, .. } => field,
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connection_error_mapping() {
        let err = AppError::Connection { attempts: 2 };
        assert_eq!(err.code(), ErrorCode::ConnectionError);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("2 attempt"));
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("year", "must be >= 1900");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_resolution_errors_keep_cause() {
        let cause = EngineError::TicketFailed {
            ticket: "t-1".into(),
            message: "observable earth:Nothing cannot be resolved".into(),
        };
        let err = AppError::ObservableResolution(cause.clone());

        assert_eq!(err.code(), ErrorCode::ObservableResolutionError);
        assert!(err.to_string().contains("cannot be resolved"));
        let source = err.source().expect("cause is preserved");
        assert_eq!(source.to_string(), cause.to_string());
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = AppError::ContextResolution(EngineError::TimedOut {
            ticket: "t-9".into(),
            timeout_ms: 500,
        });
        assert_eq!(err.code(), ErrorCode::ResolutionTimeout);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_every_error_has_distinct_code_and_status() {
        let errors = [
            AppError::validation("year", "bad"),
            AppError::InvalidFormat { message: "x".into() },
            AppError::Connection { attempts: 1 },
            AppError::ContextResolution(EngineError::Protocol { message: "x".into() }),
            AppError::ObservableResolution(EngineError::Protocol { message: "x".into() }),
            AppError::Export { path: "p".into(), message: "x".into() },
            AppError::RateLimited { limit: 1 },
            AppError::Internal { message: "x".into() },
            AppError::Configuration { message: "x".into() },
            AppError::ServiceUnavailable { message: "x".into() },
        ];

        let mut codes: Vec<u16> = errors.iter().map(|e| e.code().as_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());

        let statuses: Vec<u16> = errors.iter().map(|e| e.status_code().as_u16()).collect();
        assert_eq!(statuses, vec![400, 400, 503, 502, 502, 500, 429, 500, 500, 503]);
    }
}
