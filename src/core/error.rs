//! # Error Handling Module
//!
//! This module defines the error taxonomy for the gateway using the `thiserror` crate
//! and maps each error kind to the HTTP status code surfaced to callers.
//!
//! The taxonomy follows the routing engine's propagation policy:
//! - Failures local to a single probe or a single dispatch attempt are absorbed
//!   internally (recorded, retried) and never surface as these types directly.
//! - Failures that leave no viable path to serve a request (`NoHealthyServers`,
//!   `AllAttemptsFailed`) surface to the caller with a distinguishable error type
//!   so the front end can present a clear message.
//! - `UnknownServer` is a defensive condition on stale registry references. It is
//!   logged and treated as a no-op by every calling flow; it is never fatal.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Comprehensive error types for the inference gateway
///
/// Each variant represents a different category of error. The `#[error("...")]`
/// attribute from `thiserror` implements the `Display` trait with the given message.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No backend in the pool is currently routable
    #[error("No healthy backend servers available")]
    NoHealthyServers,

    /// Every dispatch attempt (initial + retries) failed against a healthy candidate
    #[error("All {attempts} dispatch attempts failed")]
    AllAttemptsFailed { attempts: u32 },

    /// A registry operation referenced a server id that is not registered
    #[error("Unknown server: {id}")]
    UnknownServer { id: String },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A network operation exceeded its deadline
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// HTTP client errors when probing or forwarding to backends
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unknown-server error for the given id
    pub fn unknown_server<S: Into<String>>(id: S) -> Self {
        Self::UnknownServer { id: id.into() }
    }

    /// Get the appropriate HTTP status code for this error
    ///
    /// Maps internal error types to the status codes returned to clients.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoHealthyServers => StatusCode::SERVICE_UNAVAILABLE,
            Self::AllAttemptsFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::UnknownServer { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Check if this error represents a transient condition worth retrying
    ///
    /// Transport-level failures can be retried against a different backend;
    /// terminal routing outcomes cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::HttpClient { .. } | Self::Io { .. }
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NoHealthyServers => "no_healthy_servers",
            Self::AllAttemptsFailed { .. } => "all_attempts_failed",
            Self::UnknownServer { .. } => "unknown_server",
            Self::Configuration { .. } => "configuration_error",
            Self::Timeout { .. } => "timeout",
            Self::HttpClient { .. } => "http_client_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from reqwest::Error
///
/// Call sites that know the configured deadline construct `Timeout` themselves;
/// everything else lands in the generic client-error bucket.
impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// Implement `IntoResponse` so Axum converts errors into structured HTTP responses
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
