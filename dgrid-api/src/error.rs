//! Error Types for DGRID API
//!
//! This module defines error handling for the service layer, including:
//! - ApiError struct carried on the failure channel of a request
//! - ErrorCode enum for categorizing failures
//! - IntoResponse implementation for Axum HTTP responses
//!
//! Every failure reaches the wire as status 500 with a JSON body. The code
//! lets callers tell protocol errors, concurrency violations, cache faults
//! and consistency failures apart without parsing the message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dgrid_core::{ConfigError, DgridError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for failed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Protocol errors, rejected before any cache access
    // ========================================================================
    /// Envelope carries no `operation` header
    MissingOperation,

    /// `operation` header names no known operation
    UnknownOperation,

    /// Body or identifier could not be decoded
    InvalidInput,

    // ========================================================================
    // Concurrency violations, rejected before any mutating cache call
    // ========================================================================
    /// Create request already carries a version token
    VersionPreset,

    /// Update token differs from the stored token
    VersionMismatch,

    /// Update target is missing or carries no version
    NotVersionable,

    /// Create target key is already stored
    EntityAlreadyExists,

    // ========================================================================
    // Cache faults
    // ========================================================================
    /// A cache call failed
    CacheFault,

    /// No cache manager is connected
    CacheUnavailable,

    // ========================================================================
    // Consistency failures
    // ========================================================================
    /// A write succeeded but the record could not be read back
    ConsistencyFailure,

    // ========================================================================
    // Transport and management
    // ========================================================================
    /// Internal server error
    InternalError,

    /// No reply arrived in time
    Timeout,

    /// No consumer registered at the address
    NoHandlers,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    ///
    /// Failures share one status on the wire; the code travels in the body.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::MissingOperation => "missing operation",
            ErrorCode::UnknownOperation => "unknown operation",
            ErrorCode::InvalidInput => "invalid input",
            ErrorCode::VersionPreset => "version must not be set",
            ErrorCode::VersionMismatch => "wrong version",
            ErrorCode::NotVersionable => "trying to update non-versionable/missing object",
            ErrorCode::EntityAlreadyExists => "key already exists",
            ErrorCode::CacheFault => "cache operation failed",
            ErrorCode::CacheUnavailable => "cache manager is not connected",
            ErrorCode::ConsistencyFailure => "could not read back written object",
            ErrorCode::InternalError => "internal server error",
            ErrorCode::Timeout => "operation timed out",
            ErrorCode::NoHandlers => "no handlers for address",
        }
    }

    /// True for failures caused by the cache rather than by the request.
    pub fn is_cache_fault(&self) -> bool {
        matches!(self, ErrorCode::CacheFault | ErrorCode::CacheUnavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured failure for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the failure
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn missing_operation() -> Self {
        Self::from_code(ErrorCode::MissingOperation)
    }

    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(
            ErrorCode::UnknownOperation,
            format!("unknown operation: {}", operation),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn version_preset() -> Self {
        Self::from_code(ErrorCode::VersionPreset)
    }

    pub fn version_mismatch() -> Self {
        Self::from_code(ErrorCode::VersionMismatch)
    }

    pub fn not_versionable() -> Self {
        Self::from_code(ErrorCode::NotVersionable)
    }

    pub fn entity_already_exists() -> Self {
        Self::from_code(ErrorCode::EntityAlreadyExists)
    }

    /// Create target `id` is already stored in `cache`.
    pub fn key_exists(id: impl fmt::Display, cache: &str) -> Self {
        Self::new(
            ErrorCode::EntityAlreadyExists,
            format!("key already exists: '{}' in cache '{}'", id, cache),
        )
    }

    pub fn cache_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheFault, message)
    }

    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheUnavailable, message)
    }

    /// A write was accepted but the follow-up read found nothing.
    pub fn consistency_failure(what: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ConsistencyFailure,
            format!("could not get just-{} object with id {}", what, id),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn timeout(address: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("request to '{}' timed out", address),
        )
    }

    pub fn no_handlers(address: &str) -> Self {
        Self::new(
            ErrorCode::NoHandlers,
            format!("no handlers for address {}", address),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ManagerUnavailable | StorageError::ManagerStopped => {
                ApiError::cache_unavailable(err.to_string())
            }
            StorageError::Codec { .. } | StorageError::LockPoisoned => {
                ApiError::internal_error(err.to_string())
            }
            _ => ApiError::cache_fault(err.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<DgridError> for ApiError {
    fn from(err: DgridError) -> Self {
        match err {
            DgridError::Storage(e) => e.into(),
            DgridError::Validation(e) => e.into(),
            DgridError::Config(e) => e.into(),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_is_a_500() {
        for code in [
            ErrorCode::MissingOperation,
            ErrorCode::UnknownOperation,
            ErrorCode::VersionMismatch,
            ErrorCode::CacheFault,
            ErrorCode::ConsistencyFailure,
            ErrorCode::NoHandlers,
        ] {
            assert_eq!(code.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_constructors_carry_wire_messages() {
        assert_eq!(ApiError::missing_operation().message, "missing operation");
        assert_eq!(ApiError::entity_already_exists().message, "key already exists");
        assert_eq!(ApiError::version_mismatch().message, "wrong version");
        assert!(ApiError::consistency_failure("created", "42")
            .message
            .starts_with("could not get just-created object"));
        assert!(ApiError::key_exists("42", "account")
            .message
            .starts_with("key already exists"));

        let err = ApiError::unknown_operation("upsert");
        assert_eq!(err.code, ErrorCode::UnknownOperation);
        assert!(err.message.contains("upsert"));
    }

    #[test]
    fn test_storage_error_mapping() {
        let err = ApiError::from(StorageError::fault("put", "connection reset"));
        assert_eq!(err.code, ErrorCode::CacheFault);
        assert!(err.message.contains("connection reset"));
        assert!(err.code.is_cache_fault());

        let err = ApiError::from(StorageError::ManagerUnavailable);
        assert_eq!(err.code, ErrorCode::CacheUnavailable);

        let err = ApiError::from(StorageError::Codec {
            reason: "bad bytes".to_string(),
        });
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::version_preset();
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("VERSION_PRESET"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let display = ApiError::cache_fault("boom").to_string();
        assert!(display.contains("CacheFault"));
        assert!(display.contains("boom"));
    }
}
