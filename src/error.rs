//! Error handling for the reliability service
//!
//! Expected failure modes of gated calls (exhausted retries, open circuits,
//! rate-limit denials, webhook rejections) are data - they travel in
//! [`CallOutcome`](crate::models::CallOutcome) and result structs, never as
//! errors. This module covers what remains: configuration mistakes caught at
//! registration time, store failures, and genuine internal faults.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Service-level error type.
#[derive(Error, Debug)]
pub enum ReliabilityError {
    /// Configuration loading or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A retry/breaker/rate-limit/bulk policy failed validation at registration
    #[error("Invalid policy for {provider}: {message}")]
    InvalidPolicy { provider: String, message: String },

    /// A request referenced a provider that is not registered
    #[error("Unknown provider: {provider}")]
    UnknownProvider { provider: String },

    /// Key-value store operation failed
    #[error("Store error: {message}")]
    Store { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal service error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ReliabilityError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid-policy error
    pub fn invalid_policy<P: Into<String>, S: Into<String>>(provider: P, message: S) -> Self {
        Self::InvalidPolicy {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-provider error
    pub fn unknown_provider<S: Into<String>>(provider: S) -> Self {
        Self::UnknownProvider {
            provider: provider.into(),
        }
    }

    /// Create a store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReliabilityError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ReliabilityError::InvalidPolicy { .. } => StatusCode::BAD_REQUEST,
            ReliabilityError::UnknownProvider { .. } => StatusCode::NOT_FOUND,
            ReliabilityError::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ReliabilityError::Serialization { .. } => StatusCode::BAD_REQUEST,
            ReliabilityError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ReliabilityError::Configuration { .. } => "CONFIGURATION_ERROR",
            ReliabilityError::InvalidPolicy { .. } => "INVALID_POLICY",
            ReliabilityError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            ReliabilityError::Store { .. } => "STORE_ERROR",
            ReliabilityError::Serialization { .. } => "SERIALIZATION_ERROR",
            ReliabilityError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether the operation that produced this error is worth repeating
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReliabilityError::Store { .. })
    }
}

impl IntoResponse for ReliabilityError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                error_code = error_code,
                status = %status,
                "Service error: {}",
                message
            );
        } else {
            tracing::warn!(
                error_code = error_code,
                status = %status,
                "Request error: {}",
                message
            );
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for ReliabilityError {
    fn from(err: serde_json::Error) -> Self {
        ReliabilityError::serialization(err.to_string())
    }
}

impl From<redis::RedisError> for ReliabilityError {
    fn from(err: redis::RedisError) -> Self {
        ReliabilityError::store(err.to_string())
    }
}

/// Result type used throughout the service.
pub type ReliabilityResult<T> = Result<T, ReliabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let err = ReliabilityError::invalid_policy("payments", "max_attempts must be >= 1");
        assert_eq!(
            err.to_string(),
            "Invalid policy for payments: max_attempts must be >= 1"
        );
        assert_eq!(err.error_code(), "INVALID_POLICY");

        let err = ReliabilityError::unknown_provider("fax");
        assert_eq!(err.to_string(), "Unknown provider: fax");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ReliabilityError::configuration("bad").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ReliabilityError::invalid_policy("sms", "bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ReliabilityError::unknown_provider("fax").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ReliabilityError::store("down").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_retryability() {
        assert!(ReliabilityError::store("timeout").is_retryable());
        assert!(!ReliabilityError::internal("bug").is_retryable());
        assert!(!ReliabilityError::configuration("bad").is_retryable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ReliabilityError = parse_err.into();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }
}
