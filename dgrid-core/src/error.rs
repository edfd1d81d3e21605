//! Error types for DGRID operations

use thiserror::Error;

/// Errors surfaced by the cache collaborator or the handle lifecycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Cache {operation} failed: {reason}")]
    Fault { operation: String, reason: String },

    #[error("Unable to perform operation, cache manager is not connected")]
    ManagerUnavailable,

    #[error("Cache manager has been stopped")]
    ManagerStopped,

    #[error("Cache '{name}' is not defined on the grid")]
    CacheNotFound { name: String },

    #[error("Unable to connect to cache server {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Cache handle lock poisoned")]
    LockPoisoned,

    #[error("Record codec failure: {reason}")]
    Codec { reason: String },
}

impl StorageError {
    /// Build a fault for a named cache operation.
    pub fn fault(operation: &str, reason: impl Into<String>) -> Self {
        Self::Fault {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Validation errors raised while decoding inbound records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Malformed {record_type} record: {reason}")]
    MalformedRecord { record_type: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all DGRID errors.
#[derive(Debug, Clone, Error)]
pub enum DgridError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for DGRID operations.
pub type DgridResult<T> = Result<T, DgridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_fault_display() {
        let err = StorageError::fault("put", "connection reset by peer");
        let msg = err.to_string();
        assert!(msg.contains("put"));
        assert!(msg.contains("connection reset by peer"));
    }

    #[test]
    fn test_manager_unavailable_display() {
        let msg = StorageError::ManagerUnavailable.to_string();
        assert!(msg.contains("not connected"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "DGRID_HTTP_PORT".to_string(),
            value: "eighty".to_string(),
            reason: "must be a port number".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DGRID_HTTP_PORT"));
        assert!(msg.contains("eighty"));
    }

    #[test]
    fn test_dgrid_error_from_variants() {
        let storage = DgridError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, DgridError::Storage(_)));

        let validation = DgridError::from(ValidationError::RequiredFieldMissing {
            field: "id".to_string(),
        });
        assert!(matches!(validation, DgridError::Validation(_)));

        let config = DgridError::from(ConfigError::MissingRequired {
            field: "namespace".to_string(),
        });
        assert!(matches!(config, DgridError::Config(_)));
    }
}
