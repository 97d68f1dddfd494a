//! Error types for TagVault.
//!
//! Only engine-level faults are errors. Per-item problems inside a content
//! update package (unknown service, bad tag, delete lock) are reported as
//! values in the applied package and never surface here.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the TagVault library.
#[derive(Debug, Error)]
pub enum TagVaultError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Service registry errors
    #[error("Service not found: {key}")]
    ServiceNotFound { key: String },

    #[error("Service already exists: {key}")]
    ServiceAlreadyExists { key: String },

    #[error("Operation not supported on {service_type} service: {message}")]
    InvalidServiceType {
        service_type: String,
        message: String,
    },

    // Identifier errors
    #[error("Unknown {kind} id: {id}")]
    UnknownId { kind: &'static str, id: i64 },

    #[error("Invalid tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Writer errors
    #[error("Writer is no longer running")]
    WriterClosed,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for TagVault operations.
pub type Result<T> = std::result::Result<T, TagVaultError>;

impl From<std::io::Error> for TagVaultError {
    fn from(err: std::io::Error) -> Self {
        TagVaultError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TagVaultError {
    fn from(err: serde_json::Error) -> Self {
        TagVaultError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for TagVaultError {
    fn from(err: rusqlite::Error) -> Self {
        TagVaultError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TagVaultError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TagVaultError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error comes from the storage engine itself.
    ///
    /// Storage faults abort the whole package; everything else is a caller
    /// mistake that leaves the database untouched.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, TagVaultError::Database { .. } | TagVaultError::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TagVaultError::ServiceNotFound {
            key: "6d792074616773".into(),
        };
        assert_eq!(err.to_string(), "Service not found: 6d792074616773");
    }

    #[test]
    fn test_storage_fault_classification() {
        let db = TagVaultError::from(rusqlite::Error::InvalidQuery);
        assert!(db.is_storage_fault());
        assert!(!TagVaultError::WriterClosed.is_storage_fault());
        assert!(!TagVaultError::InvalidTag {
            tag: String::new(),
            reason: "empty".into()
        }
        .is_storage_fault());
    }
}
